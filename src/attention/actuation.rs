//! # Actuation Port
//!
//! The boundary between the arbiter's decisions and the robot hardware.
//! The arbiter never talks to motors directly: it produces an ordered list of
//! [`Intent`]s and [`dispatch`] hands them to whatever [`ActuationPort`] the
//! process was started with.
//!
//! ## Failure Policy:
//! Each call is fire-and-forget. A failure is logged and the next intent is
//! still issued; retries belong to the port implementation, not the arbiter.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

/// One actuation instruction produced by the arbiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Intent {
    MovePan(i32),
    MoveTilt(i32),
    SetImage(String),
    SetIcon(String),
    /// Expressive behaviour flag used for backchannel cues
    SetBehaviour(bool),
}

/// Robot-facing side of the arbiter. Only the arbiter task calls it.
pub trait ActuationPort: Send {
    fn move_pan(&mut self, angle: i32) -> Result<()>;
    fn move_tilt(&mut self, angle: i32) -> Result<()>;
    fn set_icon(&mut self, name: &str) -> Result<()>;
    fn set_image(&mut self, name: &str) -> Result<()>;
    fn set_behaviour(&mut self, enabled: bool) -> Result<()>;
}

/// Issue intents in order, logging failures without stopping.
///
/// Returns the number of intents the port rejected.
pub fn dispatch(port: &mut dyn ActuationPort, intents: &[Intent]) -> usize {
    let mut failures = 0;
    for intent in intents {
        let result = match intent {
            Intent::MovePan(angle) => port.move_pan(*angle),
            Intent::MoveTilt(angle) => port.move_tilt(*angle),
            Intent::SetImage(name) => port.set_image(name),
            Intent::SetIcon(name) => port.set_icon(name),
            Intent::SetBehaviour(enabled) => port.set_behaviour(*enabled),
        };
        if let Err(e) = result {
            failures += 1;
            warn!(intent = ?intent, error = %e, "Actuation failed, continuing");
        }
    }
    failures
}

/// Dry-run port that records every intent as a structured log event.
#[derive(Debug, Default)]
pub struct LoggingActuator;

impl LoggingActuator {
    pub fn new() -> Self {
        Self
    }
}

impl ActuationPort for LoggingActuator {
    fn move_pan(&mut self, angle: i32) -> Result<()> {
        info!(pan = angle, "actuate: move pan");
        Ok(())
    }

    fn move_tilt(&mut self, angle: i32) -> Result<()> {
        info!(tilt = angle, "actuate: move tilt");
        Ok(())
    }

    fn set_icon(&mut self, name: &str) -> Result<()> {
        info!(icon = name, "actuate: set icon");
        Ok(())
    }

    fn set_image(&mut self, name: &str) -> Result<()> {
        info!(image = name, "actuate: set image");
        Ok(())
    }

    fn set_behaviour(&mut self, enabled: bool) -> Result<()> {
        info!(behaviour = enabled, "actuate: toggle behaviour");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Port that remembers calls and refuses tilt moves.
    #[derive(Default)]
    struct FlakyPort {
        calls: Vec<Intent>,
    }

    impl ActuationPort for FlakyPort {
        fn move_pan(&mut self, angle: i32) -> Result<()> {
            self.calls.push(Intent::MovePan(angle));
            Ok(())
        }
        fn move_tilt(&mut self, _angle: i32) -> Result<()> {
            Err(anyhow::anyhow!("robot unreachable"))
        }
        fn set_icon(&mut self, name: &str) -> Result<()> {
            self.calls.push(Intent::SetIcon(name.to_string()));
            Ok(())
        }
        fn set_image(&mut self, name: &str) -> Result<()> {
            self.calls.push(Intent::SetImage(name.to_string()));
            Ok(())
        }
        fn set_behaviour(&mut self, enabled: bool) -> Result<()> {
            self.calls.push(Intent::SetBehaviour(enabled));
            Ok(())
        }
    }

    #[test]
    fn test_dispatch_keeps_order_and_survives_failures() {
        let mut port = FlakyPort::default();
        let intents = vec![
            Intent::MovePan(35),
            Intent::MoveTilt(-7),
            Intent::SetIcon("listening.png".to_string()),
        ];

        let failures = dispatch(&mut port, &intents);

        assert_eq!(failures, 1);
        assert_eq!(
            port.calls,
            vec![Intent::MovePan(35), Intent::SetIcon("listening.png".to_string())]
        );
    }

    #[test]
    fn test_logging_actuator_accepts_everything() {
        let mut port = LoggingActuator::new();
        let intents = vec![
            Intent::MovePan(0),
            Intent::MoveTilt(-7),
            Intent::SetImage("blink.gif".to_string()),
            Intent::SetIcon("black.png".to_string()),
            Intent::SetBehaviour(true),
        ];
        assert_eq!(dispatch(&mut port, &intents), 0);
    }

    #[test]
    fn test_intent_json_shape() {
        let json = serde_json::to_value(Intent::MovePan(-35)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "move_pan", "value": -35}));
    }
}
