
mod capability_test;
mod orchestrator_test;
