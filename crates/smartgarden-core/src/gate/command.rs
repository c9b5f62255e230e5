// ── Command vocabulary ──
//
// Maps a user action on a device to the control service, wire command and
// expected optimistic effect, validating parameters on the way.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{Display, EnumString};

use crate::config::DurationDefaults;
use crate::error::CommandError;
use crate::model::{
    Device, DeviceState, MowerActivity, MowerPatch, PowerSocketPatch, ServiceId, ServicePatch,
    SocketActivity, TimedDuration, ValveActivity, ValvePatch,
};

const MIN_DURATION_SECS: u64 = 60;
const MAX_DURATION_SECS: u64 = 24 * 60 * 60;

/// A device command. `Display` gives the wire name; parsing also accepts
/// short aliases such as `open`, `close` or `park`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    #[strum(
        to_string = "START_SECONDS_TO_OVERRIDE",
        serialize = "OPEN",
        serialize = "START",
        serialize = "ON_FOR"
    )]
    StartSecondsToOverride,
    #[strum(to_string = "START_DONT_OVERRIDE", serialize = "RESUME")]
    StartDontOverride,
    #[strum(to_string = "START_OVERRIDE", serialize = "ON")]
    StartOverride,
    #[strum(
        to_string = "STOP_UNTIL_NEXT_TASK",
        serialize = "CLOSE",
        serialize = "STOP",
        serialize = "OFF"
    )]
    StopUntilNextTask,
    #[strum(to_string = "PARK_UNTIL_NEXT_TASK")]
    ParkUntilNextTask,
    #[strum(to_string = "PARK_UNTIL_FURTHER_NOTICE", serialize = "PARK")]
    ParkUntilFurtherNotice,
    #[strum(to_string = "PAUSE")]
    Pause,
    #[strum(to_string = "UNPAUSE")]
    Unpause,
}

impl CommandKind {
    pub fn takes_duration(self) -> bool {
        matches!(self, Self::StartSecondsToOverride)
    }
}

/// Optional command arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParameters {
    /// Run time in seconds; defaults per device type when omitted.
    pub duration_secs: Option<u64>,
    /// Target valve of an irrigation controller.
    pub valve: Option<ServiceId>,
}

impl CommandParameters {
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_secs = Some(seconds);
        self
    }

    pub fn with_valve(mut self, valve: impl Into<ServiceId>) -> Self {
        self.valve = Some(valve.into());
        self
    }
}

/// A validated command, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PreparedCommand {
    pub service_id: ServiceId,
    pub control: &'static str,
    pub kind: CommandKind,
    pub seconds: Option<u64>,
    /// Local effect to show once the command is accepted.
    pub optimistic: Option<ServicePatch>,
    /// Activity class the effect should produce; guards the effect.
    pub expected_active: Option<bool>,
}

#[derive(Clone, Copy)]
enum Target {
    Mower,
    Valve,
    Socket,
}

pub(crate) fn prepare(
    device: &Device,
    kind: CommandKind,
    params: &CommandParameters,
    defaults: &DurationDefaults,
    now: DateTime<Utc>,
) -> Result<PreparedCommand, CommandError> {
    let (target, service_id, default_minutes) = match &device.state {
        DeviceState::Mower(m) => (Target::Mower, m.service_id.clone(), defaults.mower_minutes),
        DeviceState::Valve(v) => {
            if params.valve.as_ref().is_some_and(|id| id != &v.service_id) {
                return Err(CommandError::validation(format!(
                    "{} has a single valve {}",
                    device.id, v.service_id
                )));
            }
            (Target::Valve, v.service_id.clone(), defaults.watering_minutes)
        }
        DeviceState::Irrigation(irr) => {
            let valve = params.valve.as_ref().ok_or_else(|| {
                CommandError::validation(format!("{} needs a target valve", device.id))
            })?;
            if !irr.valves.contains_key(valve) {
                return Err(CommandError::validation(format!(
                    "{} has no valve {valve}",
                    device.id
                )));
            }
            (Target::Valve, valve.clone(), defaults.irrigation_minutes)
        }
        DeviceState::PowerSocket(s) => {
            (Target::Socket, s.service_id.clone(), defaults.watering_minutes)
        }
        DeviceState::Sensor(_) | DeviceState::Common => {
            return Err(CommandError::validation(format!(
                "{} ({}) does not accept commands",
                device.id, device.kind
            )));
        }
    };

    if !supports(target, kind) {
        return Err(CommandError::validation(format!(
            "{kind} is not supported by {} ({})",
            device.id, device.kind
        )));
    }

    let seconds = if kind.takes_duration() {
        let secs = params
            .duration_secs
            .unwrap_or(default_minutes.saturating_mul(60));
        validate_duration(secs)?;
        Some(secs)
    } else if params.duration_secs.is_some() {
        return Err(CommandError::validation(format!("{kind} takes no duration")));
    } else {
        None
    };

    let (optimistic, expected_active) = effect(target, kind, seconds, now);
    Ok(PreparedCommand {
        service_id,
        control: control(target),
        kind,
        seconds,
        optimistic,
        expected_active,
    })
}

fn validate_duration(secs: u64) -> Result<(), CommandError> {
    if secs < MIN_DURATION_SECS || secs > MAX_DURATION_SECS {
        return Err(CommandError::validation(format!(
            "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds, got {secs}"
        )));
    }
    if secs % 60 != 0 {
        return Err(CommandError::validation(format!(
            "duration must be a multiple of 60 seconds, got {secs}"
        )));
    }
    Ok(())
}

fn supports(target: Target, kind: CommandKind) -> bool {
    use CommandKind as K;
    match target {
        Target::Mower => matches!(
            kind,
            K::StartSecondsToOverride
                | K::StartDontOverride
                | K::ParkUntilNextTask
                | K::ParkUntilFurtherNotice
        ),
        Target::Valve => matches!(
            kind,
            K::StartSecondsToOverride | K::StopUntilNextTask | K::Pause | K::Unpause
        ),
        Target::Socket => matches!(
            kind,
            K::StartSecondsToOverride
                | K::StartOverride
                | K::StopUntilNextTask
                | K::Pause
                | K::Unpause
        ),
    }
}

fn control(target: Target) -> &'static str {
    match target {
        Target::Mower => "MOWER_CONTROL",
        Target::Valve => "VALVE_CONTROL",
        Target::Socket => "POWER_SOCKET_CONTROL",
    }
}

/// Expected local effect. Commands whose outcome depends on the device's
/// schedule (resume, pause, unpause) have none.
fn effect(
    target: Target,
    kind: CommandKind,
    seconds: Option<u64>,
    now: DateTime<Utc>,
) -> (Option<ServicePatch>, Option<bool>) {
    use CommandKind as K;
    let timed = seconds.map(|seconds| TimedDuration {
        seconds,
        started_at: Some(now),
    });

    let patch = match (target, kind) {
        (Target::Mower, K::StartSecondsToOverride) => ServicePatch::Mower(MowerPatch {
            activity: Some(MowerActivity::OkCuttingTimerOverridden),
            override_duration: timed,
            ..MowerPatch::default()
        }),
        (Target::Mower, K::ParkUntilNextTask) => mower_activity(MowerActivity::ParkedTimer),
        (Target::Mower, K::ParkUntilFurtherNotice) => {
            mower_activity(MowerActivity::ParkedParkSelected)
        }
        (Target::Valve, K::StartSecondsToOverride) => ServicePatch::Valve(ValvePatch {
            activity: Some(ValveActivity::ManualWatering),
            duration: timed,
            ..ValvePatch::default()
        }),
        (Target::Valve, K::StopUntilNextTask) => ServicePatch::Valve(ValvePatch {
            activity: Some(ValveActivity::Closed),
            ..ValvePatch::default()
        }),
        (Target::Socket, K::StartSecondsToOverride) => ServicePatch::PowerSocket(PowerSocketPatch {
            activity: Some(SocketActivity::TimeLimitedOn),
            duration: timed,
            ..PowerSocketPatch::default()
        }),
        (Target::Socket, K::StartOverride) => socket_activity(SocketActivity::ForeverOn),
        (Target::Socket, K::StopUntilNextTask) => socket_activity(SocketActivity::Off),
        _ => return (None, None),
    };
    let expected = patch.activity_active();
    (Some(patch), expected)
}

fn mower_activity(activity: MowerActivity) -> ServicePatch {
    ServicePatch::Mower(MowerPatch {
        activity: Some(activity),
        ..MowerPatch::default()
    })
}

fn socket_activity(activity: SocketActivity) -> ServicePatch {
    ServicePatch::PowerSocket(PowerSocketPatch {
        activity: Some(activity),
        ..PowerSocketPatch::default()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{
        DeviceId, DeviceKind, IrrigationState, LocationId, MowerState, SensorState, ValveState,
    };

    fn now() -> DateTime<Utc> {
        "2026-05-01T10:00:00Z".parse().unwrap()
    }

    fn device(kind: DeviceKind, state: DeviceState) -> Device {
        Device::new(DeviceId::from("dev"), LocationId::from("loc"), kind, state)
    }

    fn valve() -> Device {
        device(
            DeviceKind::Valve,
            DeviceState::Valve(ValveState::new(ServiceId::from("dev:1"))),
        )
    }

    fn prepare_default(device: &Device, kind: CommandKind, params: &CommandParameters) -> Result<PreparedCommand, CommandError> {
        prepare(device, kind, params, &DurationDefaults::default(), now())
    }

    #[test]
    fn aliases_parse_to_wire_commands() {
        assert_eq!("open".parse::<CommandKind>().unwrap(), CommandKind::StartSecondsToOverride);
        assert_eq!("Close".parse::<CommandKind>().unwrap(), CommandKind::StopUntilNextTask);
        assert_eq!("park".parse::<CommandKind>().unwrap(), CommandKind::ParkUntilFurtherNotice);
        assert_eq!(
            "park_until_next_task".parse::<CommandKind>().unwrap(),
            CommandKind::ParkUntilNextTask
        );
        assert_eq!(CommandKind::StartSecondsToOverride.to_string(), "START_SECONDS_TO_OVERRIDE");
        assert!("explode".parse::<CommandKind>().is_err());
    }

    #[test]
    fn valve_open_has_guarded_effect() {
        let cmd = prepare_default(
            &valve(),
            CommandKind::StartSecondsToOverride,
            &CommandParameters::default().with_duration(1800),
        )
        .unwrap();

        assert_eq!(cmd.control, "VALVE_CONTROL");
        assert_eq!(cmd.service_id.as_str(), "dev:1");
        assert_eq!(cmd.seconds, Some(1800));
        assert_eq!(cmd.expected_active, Some(true));
        let Some(ServicePatch::Valve(patch)) = cmd.optimistic else {
            panic!("expected valve patch");
        };
        assert_eq!(patch.activity, Some(ValveActivity::ManualWatering));
        assert_eq!(patch.duration.unwrap().started_at, Some(now()));
    }

    #[test]
    fn durations_default_per_type() {
        let mower = device(
            DeviceKind::Mower,
            DeviceState::Mower(MowerState::new(ServiceId::from("dev"))),
        );
        let cmd = prepare_default(
            &mower,
            CommandKind::StartSecondsToOverride,
            &CommandParameters::default(),
        )
        .unwrap();
        assert_eq!(cmd.seconds, Some(3600));
        assert_eq!(cmd.control, "MOWER_CONTROL");

        let custom = DurationDefaults {
            watering_minutes: 5,
            ..DurationDefaults::default()
        };
        let cmd = prepare(
            &valve(),
            CommandKind::StartSecondsToOverride,
            &CommandParameters::default(),
            &custom,
            now(),
        )
        .unwrap();
        assert_eq!(cmd.seconds, Some(300));
    }

    #[test]
    fn durations_are_validated() {
        for bad in [0, 59, 90, 86_460] {
            let err = prepare_default(
                &valve(),
                CommandKind::StartSecondsToOverride,
                &CommandParameters::default().with_duration(bad),
            )
            .unwrap_err();
            assert!(matches!(err, CommandError::Validation { .. }), "{bad} accepted");
        }
        assert!(
            prepare_default(
                &valve(),
                CommandKind::StartSecondsToOverride,
                &CommandParameters::default().with_duration(86_400),
            )
            .is_ok()
        );
        assert!(
            prepare_default(
                &valve(),
                CommandKind::StopUntilNextTask,
                &CommandParameters::default().with_duration(600),
            )
            .is_err()
        );
    }

    #[test]
    fn unsupported_commands_are_rejected() {
        let sensor = device(DeviceKind::SoilSensor, DeviceState::Sensor(SensorState::default()));
        assert!(prepare_default(&sensor, CommandKind::Pause, &CommandParameters::default()).is_err());
        assert!(
            prepare_default(&valve(), CommandKind::ParkUntilNextTask, &CommandParameters::default())
                .is_err()
        );
    }

    #[test]
    fn irrigation_needs_known_valve() {
        let mut irr = IrrigationState::default();
        irr.valves
            .insert(ServiceId::from("dev:2"), ValveState::new(ServiceId::from("dev:2")));
        let controller = device(DeviceKind::IrrigationValve, DeviceState::Irrigation(irr));

        assert!(prepare_default(&controller, CommandKind::Pause, &CommandParameters::default()).is_err());
        assert!(
            prepare_default(
                &controller,
                CommandKind::Pause,
                &CommandParameters::default().with_valve("dev:5"),
            )
            .is_err()
        );
        let cmd = prepare_default(
            &controller,
            CommandKind::StartSecondsToOverride,
            &CommandParameters::default().with_valve("dev:2"),
        )
        .unwrap();
        assert_eq!(cmd.service_id.as_str(), "dev:2");
        assert_eq!(cmd.seconds, Some(1800));
    }

    #[test]
    fn pause_has_no_effect() {
        let cmd = prepare_default(&valve(), CommandKind::Pause, &CommandParameters::default()).unwrap();
        assert_eq!(cmd.optimistic, None);
        assert_eq!(cmd.expected_active, None);
    }
}
