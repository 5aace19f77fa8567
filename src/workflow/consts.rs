//! Names of persisted output fields.

pub const BODY_KEY: &str = "body";
pub const HEADERS_KEY: &str = "headers";
pub const STATUS_CODE_KEY: &str = "status_code";

pub const STDOUT_KEY: &str = "stdout";
pub const STDERR_KEY: &str = "stderr";
pub const EXIT_CODE_KEY: &str = "exit_code";

pub const RESULT_KEY: &str = "result";

pub const RESPONSE_KEY: &str = "response";
pub const TOOL_OUTPUTS_KEY: &str = "tool_outputs";
pub const ERROR_KEY: &str = "error";

pub const FILE_PATH_KEY: &str = "file_path";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const TIMEOUT_KEY: &str = "timeout";
