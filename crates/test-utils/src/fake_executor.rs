use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deploydag::errors::{DeployError, Result};
use deploydag::exec::{ExecOutput, RemoteExecutor};
use deploydag::stage::Host;

/// Scripted response for a matching command.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Exit(i32),
    Timeout,
    ConnectionError(String),
}

/// Something the fake executor saw, in global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Started { host: String, command: String },
    Finished { host: String, command: String },
}

#[derive(Debug, Clone)]
struct Rule {
    host: Option<String>,
    needle: String,
    response: FakeResponse,
}

/// A fake executor that:
/// - records every command it was asked to run (per host, in order)
/// - answers with exit 0 unless a rule matches
/// - can delay each command on a given host, to shake out ordering bugs.
///
/// Rules match on an optional host address plus a substring of the command.
/// The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    rules: Arc<Mutex<Vec<Rule>>>,
    delays: Arc<Mutex<Vec<(String, Duration)>>>,
    events: Arc<Mutex<Vec<FakeEvent>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `response` when any host runs a command containing `needle`.
    pub fn respond(self, needle: &str, response: FakeResponse) -> Self {
        self.push_rule(None, needle, response);
        self
    }

    /// Respond with `response` when `host` runs a command containing `needle`.
    pub fn respond_on(self, host: &str, needle: &str, response: FakeResponse) -> Self {
        self.push_rule(Some(host.to_string()), needle, response);
        self
    }

    /// Sleep for `delay` before finishing any command on `host`.
    pub fn delay_on(self, host: &str, delay: Duration) -> Self {
        self.delays
            .lock()
            .unwrap()
            .push((host.to_string(), delay));
        self
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Every `(host, command)` that was started, in start order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FakeEvent::Started { host, command } => Some((host, command)),
                FakeEvent::Finished { .. } => None,
            })
            .collect()
    }

    /// Commands started on `host`, in order.
    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c)
            .collect()
    }

    /// Whether any host ran a command containing `needle`.
    pub fn ran(&self, needle: &str) -> bool {
        self.calls().iter().any(|(_, c)| c.contains(needle))
    }

    fn push_rule(&self, host: Option<String>, needle: &str, response: FakeResponse) {
        self.rules.lock().unwrap().push(Rule {
            host,
            needle: needle.to_string(),
            response,
        });
    }

    fn response_for(&self, host: &str, command: &str) -> Option<FakeResponse> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.host.as_deref().is_none_or(|h| h == host) && command.contains(&r.needle))
            .map(|r| r.response.clone())
    }

    fn delay_for(&self, host: &str) -> Option<Duration> {
        self.delays
            .lock()
            .unwrap()
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, d)| *d)
    }

    fn push_event(&self, event: FakeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RemoteExecutor for FakeExecutor {
    fn execute<'a>(
        &'a self,
        host: &'a Host,
        command: &'a str,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<ExecOutput>> + Send + 'a>> {
        Box::pin(async move {
            self.push_event(FakeEvent::Started {
                host: host.address.clone(),
                command: command.to_string(),
            });

            if let Some(delay) = self.delay_for(&host.address) {
                tokio::time::sleep(delay).await;
            }

            let result = match self.response_for(&host.address, command) {
                None => Ok(ExecOutput {
                    exit_code: 0,
                    output: String::new(),
                }),
                Some(FakeResponse::Exit(code)) => Ok(ExecOutput {
                    exit_code: code,
                    output: format!("exit {code}"),
                }),
                Some(FakeResponse::Timeout) => Err(DeployError::CommandTimeout {
                    task: None,
                    host: host.address.clone(),
                    command: command.to_string(),
                    timeout: timeout.unwrap_or_default(),
                }),
                Some(FakeResponse::ConnectionError(message)) => {
                    Err(DeployError::ConnectionError {
                        task: None,
                        host: host.address.clone(),
                        message,
                    })
                }
            };

            self.push_event(FakeEvent::Finished {
                host: host.address.clone(),
                command: command.to_string(),
            });
            result
        })
    }
}
