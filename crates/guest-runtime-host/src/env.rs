//! The `env` namespace: abort reporting and console output.

use wasmtime::{Caller, Val};

use guest_runtime_common::{GuestAbort, ResultExt, RuntimeError};
use guest_runtime_core::HostContext;
use guest_runtime_core::codec::{read_string, read_utf8};

use crate::registry::{arg_i32, guest_memory};

/// `env.abort(msgPtr, filePtr, line, column)`.
///
/// Always fails: the decoded [`GuestAbort`] terminates the in-flight call.
pub fn abort(caller: &mut Caller<'_, HostContext>, params: &[Val]) -> Result<Vec<Val>, RuntimeError> {
    let view = guest_memory(caller)?;

    let message = read_string(&view, &*caller, arg_i32(params, 0)?).context("read message argument")?;
    let filename = read_string(&view, &*caller, arg_i32(params, 1)?).context("read filename argument")?;

    Err(GuestAbort {
        message,
        filename,
        line: arg_i32(params, 2)?,
        column: arg_i32(params, 3)?,
    }
    .into())
}

/// `env.println(ptr, len)`: write a UTF-8 segment to the output sink.
pub fn println(caller: &mut Caller<'_, HostContext>, params: &[Val]) -> Result<Vec<Val>, RuntimeError> {
    let view = guest_memory(caller)?;

    let line = read_utf8(&view, &*caller, arg_i32(params, 0)?, arg_i32(params, 1)?)
        .context("read message argument")?;
    caller.data().output().write_line(&line);

    Ok(Vec::new())
}
