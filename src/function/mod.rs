//! SS-019: The function the workflow invokes.
//!
//! It logs a fixed message and returns no structured output; the workflow
//! forwards `$.Payload`, which is JSON `null`.

use serde_json::Value;

pub const HANDLER_MESSAGE: &str = "This is the Lambda Handler";

/// Format and emit a message on stdout, which the runtime ships to the log stream.
pub fn print_msg(msg: &str) -> String {
    let line = format!("This is the message: {}", msg);
    println!("{}", line);
    line
}

/// Handle one invocation. The event is accepted as-is and not inspected.
pub fn lambda_handler(_event: &Value) -> Value {
    print_msg(HANDLER_MESSAGE);
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ss019_print_msg() {
        assert_eq!(print_msg("hi"), "This is the message: hi");
    }

    #[test]
    fn test_ss019_handler_returns_null() {
        let event = serde_json::json!({"pulumi_step_functions": true});
        assert_eq!(lambda_handler(&event), Value::Null);
        assert_eq!(lambda_handler(&Value::Null), Value::Null);
    }
}
