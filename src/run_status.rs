use log::warn;

/// Run status of a scan task, as stored in the `tasks.run_status` column.
///
/// Several waiting states share the display name of the request that led to
/// them, so `full_name` is not one-to-one.
#[repr(i64)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunStatus {
    DeleteRequested = 0,
    Done = 1,
    New = 2,
    Requested = 3,
    Running = 4,
    PauseRequested = 5,
    PauseWaiting = 6,
    Paused = 7,
    ResumeRequested = 8,
    ResumeWaiting = 9,
    StopRequested = 10,
    StopWaiting = 11,
    Stopped = 12,
    InternalError = 13,
    DeleteUltimateRequested = 14,
    StopRequestedGiveup = 15,
    DeleteWaiting = 16,
    DeleteUltimateWaiting = 17,
}

impl RunStatus {
    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => RunStatus::DeleteRequested,
            1 => RunStatus::Done,
            2 => RunStatus::New,
            3 => RunStatus::Requested,
            4 => RunStatus::Running,
            5 => RunStatus::PauseRequested,
            6 => RunStatus::PauseWaiting,
            7 => RunStatus::Paused,
            8 => RunStatus::ResumeRequested,
            9 => RunStatus::ResumeWaiting,
            10 => RunStatus::StopRequested,
            11 => RunStatus::StopWaiting,
            12 => RunStatus::Stopped,
            13 => RunStatus::InternalError,
            14 => RunStatus::DeleteUltimateRequested,
            15 => RunStatus::StopRequestedGiveup,
            16 => RunStatus::DeleteWaiting,
            17 => RunStatus::DeleteUltimateWaiting,
            _ => {
                warn!(
                    "Invalid run status value: {}, reporting Internal Error",
                    value
                );
                RunStatus::InternalError
            }
        }
    }

    pub fn full_name(&self) -> &'static str {
        match self {
            RunStatus::DeleteRequested | RunStatus::DeleteWaiting => "Delete Requested",
            RunStatus::DeleteUltimateRequested | RunStatus::DeleteUltimateWaiting => {
                "Ultimate Delete Requested"
            }
            RunStatus::Done => "Done",
            RunStatus::New => "New",
            RunStatus::Requested => "Requested",
            RunStatus::Running => "Running",
            RunStatus::PauseRequested | RunStatus::PauseWaiting => "Pause Requested",
            RunStatus::Paused => "Paused",
            RunStatus::ResumeRequested | RunStatus::ResumeWaiting => "Resume Requested",
            RunStatus::StopRequested | RunStatus::StopRequestedGiveup | RunStatus::StopWaiting => {
                "Stop Requested"
            }
            RunStatus::Stopped => "Stopped",
            RunStatus::InternalError => "Internal Error",
        }
    }
}

/// Display name of a stored run status value.
pub fn run_status_name(value: i64) -> &'static str {
    RunStatus::from_i64(value).full_name()
}
