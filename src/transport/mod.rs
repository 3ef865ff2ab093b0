//! SS-011: Transport — runs generated provider scripts.

pub mod local;

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Parse stdout as a flat JSON object of attributes. Non-string values are
    /// kept in their JSON text form; nulls are dropped.
    pub fn attributes(&self) -> Result<crate::core::types::Attributes, String> {
        let value: serde_json::Value = serde_json::from_str(self.stdout.trim())
            .map_err(|e| format!("provider output is not JSON ({}): {}", e, self.stdout.trim()))?;
        let object = value
            .as_object()
            .ok_or_else(|| format!("provider output is not a JSON object: {}", value))?;
        let mut attrs = crate::core::types::Attributes::new();
        for (key, v) in object {
            match v {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => {
                    attrs.insert(key.clone(), s.clone());
                }
                other => {
                    attrs.insert(key.clone(), other.to_string());
                }
            }
        }
        Ok(attrs)
    }
}
