mod logging_test;
