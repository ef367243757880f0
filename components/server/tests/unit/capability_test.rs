//! Capability checks as seen from scripts and the host.

use crate::support::{loader, Recorder, RecordingEngine, BOOTSTRAP, FINALIZE};
use async_runtime::LoopScope;
use core_types::{JsError, Value};
use server::{
    Capability, CapabilityError, Grants, NativeModule, Principal, ScriptSource, SecurityPolicy,
    Server, ServerError, EVAL_SOURCE,
};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

struct Named(&'static str);

impl NativeModule for Named {
    fn require(&self, name: &str) -> Result<Value, JsError> {
        Ok(Value::from(format!("{}:{}", self.0, name)))
    }
}

fn installing_engine() -> (RecordingEngine, Recorder) {
    let (engine, recorder) = RecordingEngine::new();
    let holder = recorder.clone();
    let engine = engine.on(BOOTSTRAP, move |_: &ScriptSource, _: &mut LoopScope<'_>| {
        let system = holder.principal();
        let holder = holder.holder();
        holder.install_native_module(&system, Arc::new(Named("first")))?;
        let again = holder.install_native_module(&system, Arc::new(Named("second")));
        assert!(matches!(again, Err(CapabilityError::ModuleAlreadyInstalled)));
        Ok(Value::Undefined)
    });
    (engine, recorder)
}

#[test]
fn native_module_installs_once() {
    let (engine, recorder) = installing_engine();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .build()
        .unwrap();

    server.run(&["-e", "1"]).unwrap();

    let value = recorder.holder().require(&recorder.principal(), "fs").unwrap();
    assert_eq!(value, Value::from("first:fs"));
}

#[test]
fn require_without_module_fails() {
    let (engine, recorder) = RecordingEngine::new();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .build()
        .unwrap();
    server.run(&["-e", "1"]).unwrap();

    let err = recorder.holder().require(&recorder.principal(), "fs").unwrap_err();
    assert!(!err.is_security_error());
}

#[test]
fn host_without_runtime_grant_cannot_run() {
    let (engine, recorder) = RecordingEngine::new();
    let grants = Arc::new(Grants::new());
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_policy(grants as Arc<dyn SecurityPolicy>)
        .with_principal(Principal::new("embedder"))
        .build()
        .unwrap();

    let err = server.run(&["-e", "1"]).unwrap_err();
    assert!(matches!(
        err,
        ServerError::Capability(CapabilityError::AccessDenied { ref principal, capability })
            if principal == "embedder" && capability == Capability::Runtime
    ));
    assert!(recorder.calls().is_empty());
}

#[test]
fn denied_script_access_is_fatal_even_when_handler_recovers() {
    let host = Principal::new("system");
    let script = Principal::new("script");
    let grants = Arc::new(Grants::new());
    grants.grant(host.clone(), Capability::Runtime);

    let (engine, recorder) = RecordingEngine::new();
    let holder = recorder.clone();
    let engine = engine.on(EVAL_SOURCE, move |_: &ScriptSource, _: &mut LoopScope<'_>| {
        let args = holder.holder().user_args(&script)?;
        Ok(Value::from(args.join(" ")))
    });
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_policy(grants.clone() as Arc<dyn SecurityPolicy>)
        .with_principal(host)
        .build()
        .unwrap();
    server.set_exception_handler(|_: &JsError| true);

    let err = server.run(&["-e", "args"]).unwrap_err();
    let error = err.script_error().unwrap();
    assert!(error.is_security_error());
    assert!(error.message.contains("script"));
    assert_eq!(server.exit_code(), 1);
    assert_eq!(recorder.count(EVAL_SOURCE), 1);
}

#[test]
fn script_built_principal_with_host_name_is_denied() {
    let host = Principal::new("system");
    let grants = Arc::new(Grants::new());
    grants.grant(host.clone(), Capability::Runtime);

    let bound_access = Rc::new(Cell::new(false));
    let (engine, recorder) = RecordingEngine::new();
    let seen = recorder.clone();
    let granted = bound_access.clone();
    let engine = engine.on(EVAL_SOURCE, move |_: &ScriptSource, _: &mut LoopScope<'_>| {
        let holder = seen.holder();
        holder.user_args(&seen.principal())?;
        granted.set(true);
        let forged = Principal::new(seen.principal().name());
        let args = holder.user_args(&forged)?;
        Ok(Value::from(args.join(" ")))
    });
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_policy(grants as Arc<dyn SecurityPolicy>)
        .with_principal(host.clone())
        .build()
        .unwrap();

    let err = server.run(&["-e", "args"]).unwrap_err();

    assert!(bound_access.get());
    assert_eq!(recorder.principal(), host);
    let error = err.script_error().unwrap();
    assert!(error.is_security_error());
    assert!(error.message.contains("system"));
    assert_eq!(server.exit_code(), 1);
    assert_eq!(recorder.count(FINALIZE), 1);
}

#[test]
fn granted_env_access_follows_revocation() {
    let embedder = Principal::new("embedder");
    let grants = Arc::new(Grants::new());
    grants.grant(embedder.clone(), Capability::Runtime);
    grants.grant(embedder.clone(), Capability::ReadEnv);

    let (engine, _) = RecordingEngine::new();
    let server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_policy(grants.clone() as Arc<dyn SecurityPolicy>)
        .with_principal(embedder.clone())
        .build()
        .unwrap();
    let holder = server.capability();

    assert!(holder.env(&embedder).is_ok());
    grants.revoke(&embedder, Capability::ReadEnv);
    assert!(matches!(
        holder.env(&embedder),
        Err(CapabilityError::AccessDenied { capability: Capability::ReadEnv, .. })
    ));
    assert_eq!(holder.control_context(&embedder).unwrap(), embedder);
}
