//! Client command admission.

pub mod receiver;

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{QuorumError, Result};
use crate::log::Payload;

pub use receiver::CommandReceiver;

/// Commands that mutate cluster state and therefore go through the leader
pub const WRITE_COMMANDS: &[&str] = &["create-topic"];

/// Payload key holding the command name
pub const COMMAND_KEY: &str = "command";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCategory {
    Read,
    Write,
}

impl std::fmt::Display for OpCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpCategory::Read => write!(f, "read"),
            OpCategory::Write => write!(f, "write"),
        }
    }
}

/// A named command with its arguments, as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<(String, String)>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<(String, String)>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QuorumError::InvalidCommand(
                "command name must not be empty".to_string(),
            ));
        }
        if let Some((arg, _)) = args.iter().find(|(arg, _)| arg == COMMAND_KEY || arg.is_empty()) {
            return Err(QuorumError::InvalidCommand(format!(
                "invalid argument name '{}'",
                arg
            )));
        }
        Ok(Self { name, args })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    pub fn category(&self) -> OpCategory {
        if WRITE_COMMANDS.contains(&self.name.as_str()) {
            OpCategory::Write
        } else {
            OpCategory::Read
        }
    }

    /// Flatten into the key/value form stored in the log. Later duplicates of
    /// an argument win.
    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert(COMMAND_KEY.to_string(), self.name.clone());
        for (arg, param) in &self.args {
            payload.insert(arg.clone(), param.clone());
        }
        payload
    }

    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let name = payload.get(COMMAND_KEY)?.clone();
        let args = payload
            .iter()
            .filter(|(k, _)| k.as_str() != COMMAND_KEY)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Some(Self { name, args })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for (arg, param) in &self.args {
            write!(f, " {}={}", arg, param)?;
        }
        Ok(())
    }
}

/// Final outcome delivered to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAck {
    Ok(String),
    Error(String),
}

impl ClientAck {
    pub fn is_ok(&self) -> bool {
        matches!(self, ClientAck::Ok(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ClientAck::Ok(msg) | ClientAck::Error(msg) => msg,
        }
    }
}

/// A client command awaiting admission.
///
/// The responder is consumed on resolution, so a bundle can be answered at
/// most once.
#[derive(Debug)]
pub struct CommandBundle {
    pub command: Command,
    pub op: OpCategory,
    pub timeout: Duration,
    responder: oneshot::Sender<ClientAck>,
}

impl CommandBundle {
    pub fn new(
        command: Command,
        op: OpCategory,
        timeout: Duration,
    ) -> (Self, oneshot::Receiver<ClientAck>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                command,
                op,
                timeout,
                responder,
            },
            rx,
        )
    }

    pub(crate) fn into_responder(self) -> oneshot::Sender<ClientAck> {
        self.responder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_command_category() {
        let create = Command::new("create-topic", args(&[("name", "orders")])).unwrap();
        assert_eq!(create.category(), OpCategory::Write);

        let list = Command::new("list-topics", vec![]).unwrap();
        assert_eq!(list.category(), OpCategory::Read);
    }

    #[test]
    fn test_command_rejects_bad_input() {
        assert!(matches!(
            Command::new("  ", vec![]),
            Err(QuorumError::InvalidCommand(_))
        ));
        assert!(Command::new("create-topic", args(&[("command", "x")])).is_err());
        assert!(Command::new("create-topic", args(&[("", "x")])).is_err());
    }

    #[test]
    fn test_payload_carries_name_and_args() {
        let cmd = Command::new(
            "create-topic",
            args(&[("name", "orders"), ("partitions", "3")]),
        )
        .unwrap();
        let payload = cmd.to_payload();
        assert_eq!(payload["command"], "create-topic");
        assert_eq!(payload["name"], "orders");
        assert_eq!(payload["partitions"], "3");

        let decoded = Command::from_payload(&payload).unwrap();
        assert_eq!(decoded.name(), "create-topic");
        assert_eq!(decoded.args().len(), 2);
        assert!(Command::from_payload(&Payload::new()).is_none());
    }

    #[test]
    fn test_command_display() {
        let cmd = Command::new("create-topic", args(&[("name", "orders")])).unwrap();
        assert_eq!(cmd.to_string(), "create-topic name=orders");
    }

    #[tokio::test]
    async fn test_bundle_answers_once() {
        let cmd = Command::new("create-topic", vec![]).unwrap();
        let (bundle, rx) = CommandBundle::new(cmd, OpCategory::Write, Duration::from_secs(1));
        let responder = bundle.into_responder();
        responder.send(ClientAck::Ok("ok".to_string())).unwrap();
        let ack = rx.await.unwrap();
        assert!(ack.is_ok());
        assert_eq!(ack.message(), "ok");
    }
}
