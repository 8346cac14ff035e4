// THEORY:
// The `notifier` module is the sensor's outward face. It turns the tracker's
// `Detected`/`Lost` events into on/off switch messages for a home-automation
// bus, and turns inbound commands into an enable flag.
//
// Key architectural principles:
// 1.  **Transport Behind a Trait**: The sensor does not speak any particular
//     broker protocol. A `Publisher` receives a topic and a message; the stock
//     `JsonLinePublisher` writes one `<topic> <json>` line per message.
// 2.  **Gate at the Edge**: Disabling the sensor only stops messages from
//     leaving. The tracker keeps learning and its state machine keeps running,
//     so re-enabling never produces a burst of stale transitions.
// 3.  **Async Plumbing**: Events arrive over an unbounded tokio channel, and the
//     enable flag is a `watch` channel shared by every command source.

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};

use crate::core_modules::tracker::TrackingEvent;
use crate::error::{PublishError, UnknownCommand};

/// Device type reported in every message.
pub const DEVICE_TYPE: &str = "camera-motion-detect";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Identifies this sensor on the bus.
    pub uuid: String,
    pub topic_base: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            uuid: "cam".to_string(),
            topic_base: "motion".to_string(),
        }
    }
}

impl NotifierConfig {
    pub fn new(uuid: impl Into<String>, topic_base: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            topic_base: topic_base.into(),
        }
    }

    /// `data/<topic_base>/<uuid>`
    pub fn topic(&self) -> String {
        format!("data/{}/{}", self.topic_base, self.uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl From<TrackingEvent> for SwitchState {
    fn from(event: TrackingEvent) -> Self {
        match event {
            TrackingEvent::Detected => SwitchState::On,
            TrackingEvent::Lost => SwitchState::Off,
        }
    }
}

/// The payload published for each state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionMessage {
    pub uuid: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub state: SwitchState,
}

impl MotionMessage {
    pub fn new(uuid: impl Into<String>, state: SwitchState) -> Self {
        Self {
            uuid: uuid.into(),
            device_type: DEVICE_TYPE.to_string(),
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Enable,
    Disable,
}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enable" | "turn_on" => Ok(Command::Enable),
            "disable" | "turn_off" => Ok(Command::Disable),
            _ => Err(UnknownCommand(s.trim().to_string())),
        }
    }
}

/// Delivers messages to the outside world.
pub trait Publisher {
    fn publish(&mut self, topic: &str, message: &MotionMessage) -> Result<(), PublishError>;
}

/// Collects messages in memory.
impl Publisher for Vec<(String, MotionMessage)> {
    fn publish(&mut self, topic: &str, message: &MotionMessage) -> Result<(), PublishError> {
        self.push((topic.to_string(), message.clone()));
        Ok(())
    }
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(&mut self, topic: &str, message: &MotionMessage) -> Result<(), PublishError> {
        (**self).publish(topic, message)
    }
}

/// Writes `<topic> <json>` lines, flushing after each one.
pub struct JsonLinePublisher<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Publisher for JsonLinePublisher<W> {
    fn publish(&mut self, topic: &str, message: &MotionMessage) -> Result<(), PublishError> {
        let payload = serde_json::to_string(message)?;
        writeln!(self.writer, "{topic} {payload}")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Shared switch for enabling and disabling event emission.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    enabled_tx: Arc<watch::Sender<bool>>,
}

impl ControlHandle {
    pub fn new(enabled: bool) -> (Self, watch::Receiver<bool>) {
        let (enabled_tx, enabled_rx) = watch::channel(enabled);
        (
            Self {
                enabled_tx: Arc::new(enabled_tx),
            },
            enabled_rx,
        )
    }

    pub fn apply(&self, command: Command) {
        let enabled = command == Command::Enable;
        let previous = self.enabled_tx.send_replace(enabled);
        if previous != enabled {
            info!("event emission {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    /// Parses and applies an inbound command. Unknown payloads are logged and
    /// leave the switch untouched.
    pub fn handle_payload(&self, payload: &str) -> Result<Command, UnknownCommand> {
        match payload.parse::<Command>() {
            Ok(command) => {
                self.apply(command);
                Ok(command)
            }
            Err(e) => {
                warn!("ignoring {e}");
                Err(e)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.enabled_tx.subscribe()
    }
}

/// What a finished notifier hands back.
#[derive(Debug)]
pub struct NotifierReport<P> {
    pub publisher: P,
    pub sent: u64,
    pub suppressed: u64,
}

/// Forwards tracking events to a publisher while emission is enabled.
pub struct Notifier<P> {
    uuid: String,
    topic: String,
    publisher: P,
    enabled: watch::Receiver<bool>,
    events: mpsc::UnboundedReceiver<TrackingEvent>,
    sent: u64,
    suppressed: u64,
}

impl<P: Publisher> Notifier<P> {
    pub fn new(
        config: &NotifierConfig,
        publisher: P,
        enabled: watch::Receiver<bool>,
        events: mpsc::UnboundedReceiver<TrackingEvent>,
    ) -> Self {
        Self {
            uuid: config.uuid.clone(),
            topic: config.topic(),
            publisher,
            enabled,
            events,
            sent: 0,
            suppressed: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes one event. Returns `false` when emission is disabled and the
    /// event was dropped.
    pub fn forward(&mut self, event: TrackingEvent) -> Result<bool, PublishError> {
        if !*self.enabled.borrow() {
            debug!("emission disabled, dropping {event:?}");
            self.suppressed += 1;
            return Ok(false);
        }

        let message = MotionMessage::new(self.uuid.as_str(), event.into());
        self.publisher.publish(&self.topic, &message)?;
        self.sent += 1;
        Ok(true)
    }

    /// Forwards events until every sender is gone or publishing fails.
    pub async fn run(mut self) -> Result<NotifierReport<P>, PublishError> {
        info!("publishing motion events on {}", self.topic);
        while let Some(event) = self.events.recv().await {
            self.forward(event)?;
        }
        debug!("event channel closed");
        Ok(NotifierReport {
            publisher: self.publisher,
            sent: self.sent,
            suppressed: self.suppressed,
        })
    }
}

/// Applies one command per input line until end of input. Returns the number
/// of commands applied.
pub async fn read_commands<R>(reader: R, control: ControlHandle) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if control.handle_payload(&line).is_ok() {
            applied += 1;
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::core_modules::frame::Frame;
    use crate::core_modules::image::Image;
    use crate::core_modules::pixel::Pixel;
    use crate::core_modules::tracker::Tracker;

    #[test]
    fn topic_combines_base_and_uuid() {
        assert_eq!(NotifierConfig::new("porch", "sensors").topic(), "data/sensors/porch");
        assert_eq!(NotifierConfig::default().topic(), "data/motion/cam");
    }

    #[test]
    fn message_matches_wire_format() {
        let on = serde_json::to_string(&MotionMessage::new("cam", SwitchState::On)).unwrap();
        assert_eq!(on, r#"{"uuid":"cam","type":"camera-motion-detect","state":"on"}"#);
        let off: MotionMessage =
            serde_json::from_str(r#"{"uuid":"x","type":"camera-motion-detect","state":"off"}"#).unwrap();
        assert_eq!(off.state, SwitchState::Off);
    }

    #[test]
    fn commands_accept_both_spellings() {
        assert_eq!("enable".parse(), Ok(Command::Enable));
        assert_eq!(" TURN_ON\n".parse(), Ok(Command::Enable));
        assert_eq!("disable".parse(), Ok(Command::Disable));
        assert_eq!("turn_off".parse(), Ok(Command::Disable));
        assert_eq!("reboot".parse::<Command>(), Err(UnknownCommand("reboot".into())));
    }

    #[test]
    fn unknown_payload_leaves_switch_alone() {
        let (control, _rx) = ControlHandle::new(true);
        assert!(control.handle_payload("bogus").is_err());
        assert!(control.is_enabled());
        control.handle_payload("disable").unwrap();
        assert!(!control.is_enabled());
    }

    #[test]
    fn json_line_publisher_writes_topic_and_payload() {
        let mut publisher = JsonLinePublisher::new(Vec::new());
        publisher
            .publish("data/motion/cam", &MotionMessage::new("cam", SwitchState::Off))
            .unwrap();
        let written = String::from_utf8(publisher.into_inner()).unwrap();
        assert_eq!(
            written,
            "data/motion/cam {\"uuid\":\"cam\",\"type\":\"camera-motion-detect\",\"state\":\"off\"}\n"
        );
    }

    #[tokio::test]
    async fn notifier_forwards_until_channel_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (_control, enabled) = ControlHandle::new(true);
        let notifier = Notifier::new(&NotifierConfig::default(), Vec::new(), enabled, rx);

        tx.send(TrackingEvent::Detected).unwrap();
        tx.send(TrackingEvent::Lost).unwrap();
        drop(tx);

        let report = notifier.run().await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.suppressed, 0);
        let states: Vec<_> = report.publisher.iter().map(|(_, m)| m.state).collect();
        assert_eq!(states, [SwitchState::On, SwitchState::Off]);
        assert!(report.publisher.iter().all(|(topic, _)| topic == "data/motion/cam"));
    }

    #[tokio::test]
    async fn disabled_sensor_keeps_tracking_but_stays_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (control, enabled) = ControlHandle::new(true);
        control.apply(Command::Disable);

        let config = TrackerConfig {
            learning_rate: 0.2,
            weight_floor: 0.5,
            relearn_frames: 2,
            enter_ratio: 0.5,
            exit_ratio: 0.1,
            ..Default::default()
        };
        let mut tracker = Tracker::new(config, tx).unwrap();
        let dark = Pixel::gray(30).to_packed();
        let bright = Pixel::gray(230).to_packed();
        for sequence in 0..3 {
            tracker
                .update(&Frame::from_samples(sequence, Image::filled(4, 4, dark)))
                .unwrap();
        }
        tracker
            .update(&Frame::from_samples(3, Image::filled(4, 4, bright)))
            .unwrap();
        assert!(tracker.is_detecting());
        drop(tracker);

        let notifier = Notifier::new(&NotifierConfig::default(), Vec::new(), enabled, rx);
        let report = notifier.run().await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.suppressed, 1);
        assert!(report.publisher.is_empty());
    }

    #[tokio::test]
    async fn command_reader_applies_each_line() {
        let (control, enabled) = ControlHandle::new(true);
        let input: &[u8] = b"turn_off\n\nnonsense\nturn_on\ndisable\n";
        let applied = read_commands(tokio::io::BufReader::new(input), control.clone())
            .await
            .unwrap();
        assert_eq!(applied, 3);
        assert!(!*enabled.borrow());
        assert!(!control.is_enabled());
    }
}
