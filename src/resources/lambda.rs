//! SS-008: Lambda function handler — archive inspection and function scripts.

use super::{delete_if_present, quote};
use crate::core::types::{Attributes, ResolvedResource};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;

const NOT_FOUND: &str = "ResourceNotFoundException";

/// create-function attempts while a new execution role propagates.
const ROLE_PROPAGATION_ATTEMPTS: u32 = 6;
const ROLE_PROPAGATION_DELAY_SECS: u32 = 2;
/// Message Lambda returns while IAM has not yet propagated the role.
const ROLE_NOT_ASSUMABLE: &str = "cannot be assumed by Lambda";

/// What the provider needs to know about a deployment archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// base64(SHA-256(archive bytes)), the format the provider reports as CodeSha256
    pub code_sha256: String,
    pub entries: usize,
    pub size_bytes: u64,
}

/// The archive entry a handler must resolve to, for runtimes where that is knowable.
pub fn handler_entry(runtime: &str, handler: &str) -> Option<Vec<String>> {
    if runtime.starts_with("provided") {
        return Some(vec!["bootstrap".to_string()]);
    }
    let (module, _function) = handler.rsplit_once('.')?;
    let base = module.replace('.', "/");
    if runtime.starts_with("python") {
        Some(vec![format!("{}.py", base)])
    } else if runtime.starts_with("nodejs") {
        Some(vec![format!("{}.js", module), format!("{}.mjs", module)])
    } else {
        None
    }
}

/// Open a deployment archive, check the handler entry exists, and hash it.
pub fn inspect_archive(path: &Path, runtime: &str, handler: &str) -> Result<ArchiveInfo, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read archive {}: {}", path.display(), e))?;
    let archive = zip::ZipArchive::new(Cursor::new(&bytes))
        .map_err(|e| format!("{} is not a zip archive: {}", path.display(), e))?;

    if let Some(candidates) = handler_entry(runtime, handler) {
        let found = archive
            .file_names()
            .any(|name| candidates.iter().any(|c| c == name));
        if !found {
            return Err(format!(
                "archive {} has no {} for handler '{}' ({})",
                path.display(),
                candidates.join(" or "),
                handler,
                runtime
            ));
        }
    }

    Ok(ArchiveInfo {
        code_sha256: base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&bytes)),
        entries: archive.len(),
        size_bytes: bytes.len() as u64,
    })
}

/// Run `command`, retrying with doubling delay only while Lambda reports
/// the execution role as not assumable. Prints the command's stdout.
fn retry_while_role_propagates(command: &str, attempts: u32, delay_secs: u32) -> String {
    [
        "ERR_FILE=$(mktemp)".to_string(),
        "trap 'rm -f \"$ERR_FILE\"' EXIT".to_string(),
        format!("DELAY={}", delay_secs),
        format!("for ATTEMPT in $(seq 1 {}); do", attempts),
        format!("  if OUT=$({} 2>\"$ERR_FILE\"); then", command),
        "    echo \"$OUT\"".to_string(),
        "    exit 0".to_string(),
        "  else".to_string(),
        "    RC=$?".to_string(),
        "  fi".to_string(),
        format!(
            "  if ! grep -q {} \"$ERR_FILE\" || [ \"$ATTEMPT\" -eq {} ]; then",
            quote(ROLE_NOT_ASSUMABLE),
            attempts
        ),
        "    cat \"$ERR_FILE\" >&2".to_string(),
        "    exit \"$RC\"".to_string(),
        "  fi".to_string(),
        "  echo \"execution role not assumable yet, retry in ${DELAY}s\" >&2".to_string(),
        "  sleep \"$DELAY\"".to_string(),
        "  DELAY=$((DELAY * 2))".to_string(),
        "done".to_string(),
    ]
    .join("\n")
}

/// Generate shell to create the function. The execution role is usually
/// created moments before, so create-function retries until IAM has
/// propagated it.
pub fn create_script(resource: &ResolvedResource) -> Result<String, String> {
    let code = resource.prop("code")?;
    let create = format!(
        "aws lambda create-function --function-name {} --description {} --runtime {} \
         --handler {} --role {} --zip-file {} \
         --query '{{arn:FunctionArn,code_sha256:CodeSha256}}' --output json",
        quote(&resource.name),
        quote(resource.prop("description")?),
        quote(resource.prop("runtime")?),
        quote(resource.prop("handler")?),
        quote(resource.prop("role")?),
        quote(&format!("fileb://{}", code)),
    );
    Ok([
        "set -euo pipefail".to_string(),
        retry_while_role_propagates(
            &create,
            ROLE_PROPAGATION_ATTEMPTS,
            ROLE_PROPAGATION_DELAY_SECS,
        ),
    ]
    .join("\n"))
}

/// Generate shell to push new code, wait, then converge configuration.
pub fn update_script(resource: &ResolvedResource) -> Result<String, String> {
    let name = quote(&resource.name);
    let code = resource.prop("code")?;
    Ok([
        "set -euo pipefail".to_string(),
        format!(
            "aws lambda update-function-code --function-name {} --zip-file {} > /dev/null",
            name,
            quote(&format!("fileb://{}", code))
        ),
        format!("aws lambda wait function-updated --function-name {}", name),
        format!(
            "aws lambda update-function-configuration --function-name {} --description {} \
             --runtime {} --handler {} --role {} \
             --query '{{arn:FunctionArn,code_sha256:CodeSha256}}' --output json",
            name,
            quote(resource.prop("description")?),
            quote(resource.prop("runtime")?),
            quote(resource.prop("handler")?),
            quote(resource.prop("role")?),
        ),
    ]
    .join("\n"))
}

/// Generate shell to delete the function.
pub fn delete_script(attrs: &Attributes) -> Result<String, String> {
    let name = attrs
        .get("name")
        .ok_or_else(|| "lambda_function state has no name".to_string())?;
    let delete = format!("aws lambda delete-function --function-name {}", quote(name));
    Ok(format!(
        "set -euo pipefail\n{}",
        delete_if_present(&delete, NOT_FOUND)
    ))
}

/// Write a small archive with the given entries. Test fixture.
#[cfg(test)]
pub(crate) fn write_test_archive(path: &Path, entries: &[&str]) {
    use std::io::Write;
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o755);
    for entry in entries {
        zip.start_file(*entry, options).unwrap();
        zip.write_all(b"#!/bin/sh\necho hello\n").unwrap();
    }
    zip.finish().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceKind;
    use crate::transport::local::exec_local;
    use indexmap::IndexMap;

    fn function() -> ResolvedResource {
        ResolvedResource {
            kind: ResourceKind::LambdaFunction,
            name: "demo-lambda".to_string(),
            props: IndexMap::from([
                ("description".to_string(), "Lambda function".to_string()),
                ("role".to_string(), "arn:aws:iam::1:role/demo-lambda-role".to_string()),
                ("runtime".to_string(), "provided.al2023".to_string()),
                ("handler".to_string(), "bootstrap".to_string()),
                ("code".to_string(), "/srv/package.zip".to_string()),
            ]),
            tags: IndexMap::new(),
        }
    }

    #[test]
    fn test_ss008_handler_entry() {
        assert_eq!(
            handler_entry("provided.al2023", "bootstrap"),
            Some(vec!["bootstrap".to_string()])
        );
        assert_eq!(
            handler_entry("python3.9", "lambda_function.lambda_handler"),
            Some(vec!["lambda_function.py".to_string()])
        );
        assert_eq!(
            handler_entry("python3.12", "pkg.app.handler"),
            Some(vec!["pkg/app.py".to_string()])
        );
        assert_eq!(handler_entry("java21", "com.Example::handle"), None);
    }

    #[test]
    fn test_ss008_inspect_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.zip");
        write_test_archive(&path, &["bootstrap"]);
        let info = inspect_archive(&path, "provided.al2023", "bootstrap").unwrap();
        assert_eq!(info.entries, 1);
        assert!(info.size_bytes > 0);
        // 32 bytes base64-encoded
        assert_eq!(info.code_sha256.len(), 44);

        let again = inspect_archive(&path, "provided.al2023", "bootstrap").unwrap();
        assert_eq!(info, again);
    }

    #[test]
    fn test_ss008_inspect_archive_missing_handler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.zip");
        write_test_archive(&path, &["main.py"]);
        let err = inspect_archive(&path, "python3.9", "lambda_function.lambda_handler").unwrap_err();
        assert!(err.contains("lambda_function.py"));
    }

    #[test]
    fn test_ss008_inspect_archive_not_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.zip");
        std::fs::write(&path, "plain text").unwrap();
        let err = inspect_archive(&path, "provided.al2023", "bootstrap").unwrap_err();
        assert!(err.contains("not a zip archive"));
    }

    #[test]
    fn test_ss008_inspect_archive_missing_file() {
        let err = inspect_archive(Path::new("/nonexistent/package.zip"), "provided", "x").unwrap_err();
        assert!(err.contains("cannot read archive"));
    }

    #[test]
    fn test_ss008_create_script() {
        let script = create_script(&function()).unwrap();
        assert!(script.contains("aws lambda create-function --function-name 'demo-lambda'"));
        assert!(script.contains("--zip-file 'fileb:///srv/package.zip'"));
        assert!(script.contains("--role 'arn:aws:iam::1:role/demo-lambda-role'"));
        assert!(script.contains("code_sha256:CodeSha256"));
    }

    #[test]
    fn test_ss008_create_script_retries_role_propagation() {
        let script = create_script(&function()).unwrap();
        let create = script.find("aws lambda create-function").unwrap();
        let lp = script.find("for ATTEMPT in $(seq 1 6); do").unwrap();
        assert!(lp < create);
        assert!(script.contains("grep -q 'cannot be assumed by Lambda'"));
        assert!(script.contains("DELAY=2"));
        assert!(script.contains("sleep \"$DELAY\""));
    }

    /// Bash function standing in for create-function: fails with `error`
    /// until it has been called `failures` times, counting calls in `dir`.
    fn flaky_create(dir: &Path, failures: u32, error: &str) -> String {
        let count = dir.join("count");
        format!(
            "fake_create() {{\n  \
             N=$(( $(cat '{count}' 2>/dev/null || echo 0) + 1 ))\n  \
             echo \"$N\" > '{count}'\n  \
             if [ \"$N\" -le {failures} ]; then echo '{error}' >&2; return 254; fi\n  \
             echo '{{\"arn\":\"arn:aws:lambda:eu-west-1:1:function:demo-lambda\"}}'\n\
             }}",
            count = count.display(),
            failures = failures,
            error = error
        )
    }

    #[test]
    fn test_ss008_retry_until_role_assumable() {
        let dir = tempfile::tempdir().unwrap();
        let error = "An error occurred (InvalidParameterValueException) when calling the \
                     CreateFunction operation: The role defined for the function cannot be \
                     assumed by Lambda.";
        let script = format!(
            "set -euo pipefail\n{}\n{}",
            flaky_create(dir.path(), 2, error),
            retry_while_role_propagates("fake_create", 6, 0)
        );
        let out = exec_local(&script).unwrap();
        assert!(out.success(), "{}", out.stderr);
        assert!(out.stdout.contains("function:demo-lambda"));
        let calls = std::fs::read_to_string(dir.path().join("count")).unwrap();
        assert_eq!(calls.trim(), "3");
    }

    #[test]
    fn test_ss008_retry_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "set -euo pipefail\n{}\n{}",
            flaky_create(
                dir.path(),
                99,
                "The role defined for the function cannot be assumed by Lambda."
            ),
            retry_while_role_propagates("fake_create", 3, 0)
        );
        let out = exec_local(&script).unwrap();
        assert_eq!(out.exit_code, 254);
        assert!(out.stderr.contains("cannot be assumed"));
        let calls = std::fs::read_to_string(dir.path().join("count")).unwrap();
        assert_eq!(calls.trim(), "3");
    }

    #[test]
    fn test_ss008_other_create_errors_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!(
            "set -euo pipefail\n{}\n{}",
            flaky_create(dir.path(), 99, "An error occurred (ResourceConflictException)"),
            retry_while_role_propagates("fake_create", 6, 0)
        );
        let out = exec_local(&script).unwrap();
        assert_eq!(out.exit_code, 254);
        assert!(out.stderr.contains("ResourceConflictException"));
        let calls = std::fs::read_to_string(dir.path().join("count")).unwrap();
        assert_eq!(calls.trim(), "1");
    }

    #[test]
    fn test_ss008_update_script_waits_between_calls() {
        let script = update_script(&function()).unwrap();
        let code = script.find("update-function-code").unwrap();
        let wait = script.find("wait function-updated").unwrap();
        let config = script.find("update-function-configuration").unwrap();
        assert!(code < wait && wait < config);
    }

    #[test]
    fn test_ss008_delete_script() {
        let attrs = Attributes::from([("name".to_string(), "demo-lambda".to_string())]);
        assert!(delete_script(&attrs)
            .unwrap()
            .contains("delete-function --function-name 'demo-lambda'"));
        assert!(delete_script(&Attributes::new()).is_err());
    }
}
