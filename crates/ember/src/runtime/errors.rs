use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Runtime unreachable: {0}")]
    Unreachable(String),

    #[error("Runtime timed out: {0}")]
    Timeout(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Stream decode error: {0}")]
    Decode(String),
}

fn is_connection_error(err: &reqwest::Error) -> bool {
    err.is_connect() || (err.status().is_none() && err.is_request() && !err.is_timeout())
}

fn runtime_error_from_reqwest(error: &reqwest::Error) -> RuntimeError {
    if error.is_timeout() {
        return RuntimeError::Timeout("Request timed out waiting for the runtime.".to_string());
    }

    if is_connection_error(error) {
        let msg = if let Some(url) = error.url() {
            if let Some(host) = url.host_str() {
                let port_info = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
                format!(
                    "Could not connect to {}{} - is the inference runtime running?",
                    host, port_info
                )
            } else {
                "Could not connect to the inference runtime - is it running?".to_string()
            }
        } else {
            "Could not connect to the inference runtime - is it running?".to_string()
        };
        return RuntimeError::Unreachable(msg);
    }

    let mut details = vec![];
    if let Some(status) = error.status() {
        details.push(format!("status: {}", status));
    }
    let msg = if details.is_empty() {
        error.to_string()
    } else {
        format!("{} ({})", error, details.join(", "))
    };
    RuntimeError::RequestFailed(msg)
}

impl From<reqwest::Error> for RuntimeError {
    fn from(error: reqwest::Error) -> Self {
        runtime_error_from_reqwest(&error)
    }
}
