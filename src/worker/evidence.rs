use crate::browser::PageEvent;
use crate::model::{NetworkError, RunResult};

/// Log lines and network errors collected while a task runs.
#[derive(Debug, Default)]
pub struct Evidence {
    logs: Vec<String>,
    network_errors: Vec<NetworkError>,
}

impl Evidence {
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn system_error(&mut self, message: &str) {
        self.log(format!("[System] Error: {}", message));
    }

    pub fn record(&mut self, event: PageEvent) {
        match event {
            PageEvent::Console { kind, text } => {
                self.log(format!("[Browser] {}: {}", kind, text));
            }
            PageEvent::RequestFailed { method, url, error } => {
                self.network_errors
                    .push(NetworkError::RequestFailed { url, error, method });
            }
            PageEvent::Response {
                method,
                url,
                status,
                status_text,
            } if status >= 400 => {
                self.network_errors.push(NetworkError::HttpError {
                    url,
                    status,
                    status_text,
                    method,
                });
            }
            PageEvent::Response { .. } => {}
        }
    }

    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    pub fn into_result(self, success: bool, title: String, screenshot: Option<String>) -> RunResult {
        RunResult {
            success,
            screenshot,
            logs: self.logs,
            title,
            network_errors: self.network_errors,
            ..Default::default()
        }
    }
}
