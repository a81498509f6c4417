//! The `index` namespace: guest logging and placeholder imports.
//!
//! Only `log.log` is implemented. The remaining entries (type conversion,
//! big decimals, key-value store, ethereum calls, data sources) are
//! unimplemented extension points: they ignore their arguments and return
//! zero so that modules importing them can still be instantiated.

use tracing::debug;
use wasmtime::{Caller, Val};

use guest_runtime_common::{ResultExt, RuntimeError};
use guest_runtime_core::codec::read_string;
use guest_runtime_core::{CallRecord, HostContext, NativeValue};

use crate::logging::{forward, level_from_i32};
use crate::registry::{arg_i32, guest_memory};

/// `index.log.log(level, msgPtr)`: record the call and forward the message.
pub fn log_log(caller: &mut Caller<'_, HostContext>, params: &[Val]) -> Result<Vec<Val>, RuntimeError> {
    let level = arg_i32(params, 0)?;
    let view = guest_memory(caller)?;
    let message = read_string(&view, &*caller, arg_i32(params, 1)?).context("read message argument")?;

    let ctx = caller.data();
    forward(&ctx.invocation_id, level_from_i32(level), &message);
    ctx.record(CallRecord::new(
        "index",
        "log.log",
        vec![NativeValue::I32(level), NativeValue::Text(message)],
    ));

    Ok(Vec::new())
}

/// Placeholder returning a single zero word.
pub fn zero(_caller: &mut Caller<'_, HostContext>, params: &[Val]) -> Result<Vec<Val>, RuntimeError> {
    debug!(args = params.len(), "placeholder import called");
    Ok(vec![Val::I32(0)])
}

/// Placeholder without results.
pub fn nothing(_caller: &mut Caller<'_, HostContext>, params: &[Val]) -> Result<Vec<Val>, RuntimeError> {
    debug!(args = params.len(), "placeholder import called");
    Ok(Vec::new())
}
