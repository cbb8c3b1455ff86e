//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use wgwarden_core::config::WardenConfig;
use wgwarden_core::platform::{PlatformProfile, PrivilegeCheck};
use wgwarden_core::process::{CommandOutput, CommandRunner, CommandSpec, ProcessError};
use wgwarden_core::tunnel::{NetworkProbe, ProbeError};

pub const EXIT_IP: &str = "34.102.88.164";
pub const ORIGINAL_IP: &str = "49.145.198.195";
pub const IP_SERVICE: &str = "https://api.ipify.org";
pub const FALLBACK_IP_SERVICE: &str = "https://ifconfig.me";

pub const TUNNEL_CONF: &str = "\
[Interface]
PrivateKey = wLy94QgcI4YdpjXv4qFbJBqTFBlCNJQ4Kkaciu2RNGA=
Address = 10.49.0.4/32
DNS = 172.21.156.241
MTU = 1380

[Peer]
PublicKey = p0WqIapEnqA27uVZT5LKXQxHjrfiFL1kEJpXJcpV3DI=
AllowedIPs = 0.0.0.0/0, ::/0
Endpoint = 34.102.88.164:443
";

/// Scripted reply for one command invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit(i32, String),
    SpawnError,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Exit(0, stdout.to_string())
    }

    pub fn fail(code: i32) -> Self {
        Reply::Exit(code, String::new())
    }
}

struct Rule {
    program: String,
    args: Vec<String>,
    replies: VecDeque<Reply>,
    hits: usize,
    cancel_on: Option<(usize, CancellationToken)>,
}

impl Rule {
    fn matches(&self, command: &CommandSpec) -> bool {
        command.program_name() == self.program
            && command.args.len() >= self.args.len()
            && command.args.iter().zip(&self.args).all(|(a, b)| a == b)
    }
}

/// [`CommandRunner`] answering from rules keyed by program name and a
/// leading-argument prefix. Replies are consumed in order; the last one
/// repeats. Unscripted commands exit with status 1.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        FakeRunner::default()
    }

    pub fn on(self, program: &str, args: &[&str], reply: Reply) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            match rules
                .iter_mut()
                .find(|rule| rule.program == program && rule.args == args)
            {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    program: program.to_string(),
                    args: args.iter().map(|a| a.to_string()).collect(),
                    replies: VecDeque::from([reply]),
                    hits: 0,
                    cancel_on: None,
                }),
            }
        }
        self
    }

    /// Cancel `token` when the matching command runs for the `nth` time.
    pub fn cancel_on(self, program: &str, args: &[&str], nth: usize, token: CancellationToken) -> Self {
        {
            let mut rules = self.rules.lock().unwrap();
            let rule = rules
                .iter_mut()
                .find(|rule| rule.program == program && rule.args == args)
                .expect("cancel_on needs a scripted rule");
            rule.cancel_on = Some((nth, token));
        }
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, program: &str, args: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| {
                call.program_name() == program
                    && call.args.len() >= args.len()
                    && call.args.iter().zip(args).all(|(a, b)| a == b)
            })
            .count()
    }

    pub fn called(&self, program: &str, args: &[&str]) -> bool {
        self.count(program, args) > 0
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().unwrap().push(command.clone());

        let reply = {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|rule| rule.matches(command)) {
                Some(rule) => {
                    rule.hits += 1;
                    if let Some((nth, token)) = &rule.cancel_on {
                        if rule.hits == *nth {
                            token.cancel();
                        }
                    }
                    if rule.replies.len() > 1 {
                        rule.replies.pop_front()
                    } else {
                        rule.replies.front().cloned()
                    }
                }
                None => None,
            }
        };

        match reply {
            Some(Reply::Exit(code, stdout)) => Ok(CommandOutput {
                status: Some(code),
                stdout,
                stderr: if code == 0 {
                    String::new()
                } else {
                    format!("{} failed", command.program_name())
                },
            }),
            Some(Reply::SpawnError) => Err(ProcessError::Spawn {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "program not found"),
            }),
            None => Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "not scripted".to_string(),
            }),
        }
    }
}

/// [`NetworkProbe`] with scripted IP lookups, HTTP status and DNS outcome.
pub struct FakeProbe {
    texts: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    status: Option<u16>,
    dns: bool,
    fetches: Mutex<Vec<String>>,
    cancel_on_fetch: Option<CancellationToken>,
}

impl FakeProbe {
    pub fn new() -> Self {
        FakeProbe {
            texts: Mutex::new(HashMap::new()),
            status: Some(200),
            dns: true,
            fetches: Mutex::new(Vec::new()),
            cancel_on_fetch: None,
        }
    }

    /// Queue a reply for `url`; `None` makes the lookup fail.
    pub fn ip(self, url: &str, reply: Option<&str>) -> Self {
        self.texts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(reply.map(str::to_string));
        self
    }

    pub fn http_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }

    pub fn dns_failing(mut self) -> Self {
        self.dns = false;
        self
    }

    /// Cancel `token` as soon as any IP lookup runs.
    pub fn cancel_on_fetch(mut self, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some(token);
        self
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkProbe for FakeProbe {
    async fn fetch_text(&self, url: &str, _timeout: Duration) -> Result<String, ProbeError> {
        self.fetches.lock().unwrap().push(url.to_string());
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        let reply = {
            let mut texts = self.texts.lock().unwrap();
            texts.get_mut(url).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front().flatten()
                } else {
                    queue.front().cloned().flatten()
                }
            })
        };
        reply.ok_or_else(|| ProbeError::Http {
            url: url.to_string(),
            message: "unreachable".to_string(),
        })
    }

    async fn http_status(&self, url: &str, _timeout: Duration) -> Result<u16, ProbeError> {
        self.status
            .ok_or_else(|| ProbeError::Timeout(format!("GET {}", url)))
    }

    async fn resolve(&self, host: &str, _timeout: Duration) -> Result<Vec<IpAddr>, ProbeError> {
        if self.dns {
            Ok(vec!["142.250.72.14".parse().unwrap()])
        } else {
            Err(ProbeError::Resolve {
                host: host.to_string(),
                message: "no such host".to_string(),
            })
        }
    }
}

/// Privilege check with a fixed answer.
pub struct FixedPrivileges(pub bool);

#[async_trait]
impl PrivilegeCheck for FixedPrivileges {
    async fn is_elevated(&self) -> bool {
        self.0
    }
}

/// Temporary directory holding empty files named after `binaries`.
pub fn engine_dir(binaries: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for binary in binaries {
        fs::write(dir.path().join(binary), b"").unwrap();
    }
    dir
}

pub fn linux_profile(install_dirs: &[&Path]) -> PlatformProfile {
    PlatformProfile {
        install_dirs: install_dirs.iter().map(|d| d.to_path_buf()).collect(),
        ..PlatformProfile::linux()
    }
}

pub fn windows_profile(install_dirs: &[&Path]) -> PlatformProfile {
    PlatformProfile {
        install_dirs: install_dirs.iter().map(|d| d.to_path_buf()).collect(),
        ..PlatformProfile::windows()
    }
}

/// Settings writing artifacts into `artifact_dir`, with a known pre-tunnel IP.
pub fn settings(artifact_dir: &Path) -> WardenConfig {
    let mut settings = WardenConfig::new();
    settings.tunnel.artifact_dir = Some(artifact_dir.to_path_buf());
    settings.verify.original_ip = Some(ORIGINAL_IP.to_string());
    settings.verify.settle_delay_secs = 1;
    settings
}

pub fn dir_entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}
