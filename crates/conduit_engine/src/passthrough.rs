//! Native-query passthrough: named operations with keyword arguments.
//!
//! Validation happens entirely up front, so a rejected call never reaches
//! the adapter. The call itself runs lazily on the first pull of the stream.

use crate::adapter::operations_for;
use crate::config::EngineKind;
use crate::descriptor::NativeCallDescriptor;
use crate::error::{HandlerError, HandlerResult};

/// Declaration of one passthrough operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeOperation {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub description: &'static str,
}

impl NativeOperation {
    fn accepts(&self, argument: &str) -> bool {
        self.required.contains(&argument) || self.optional.contains(&argument)
    }
}

/// Checks `call` against the operations declared for `kind`.
pub fn validate_native_call(
    kind: EngineKind,
    call: &NativeCallDescriptor,
) -> HandlerResult<&'static NativeOperation> {
    let operation = operations_for(kind)
        .iter()
        .find(|operation| operation.name == call.operation)
        .ok_or_else(|| HandlerError::UnknownOperation {
            engine: kind.to_string(),
            operation: call.operation.clone(),
        })?;
    if let Some(missing) = operation
        .required
        .iter()
        .find(|argument| call.args.get(**argument).map_or(true, |value| value.is_null()))
    {
        return Err(HandlerError::MissingArgument {
            operation: call.operation.clone(),
            argument: missing.to_string(),
        });
    }
    if let Some(undeclared) = call.args.keys().find(|argument| !operation.accepts(argument)) {
        return Err(HandlerError::validation(format!(
            "operation '{}' does not accept argument '{undeclared}'",
            call.operation
        )));
    }
    Ok(operation)
}
