//! Error Channel
//!
//! Every OS status word is decoded into an [`OsError`] and parked in a
//! single last-error slot. Callers poll the slot after any call that may
//! have failed; reading it clears it.

use std::fmt;

use thiserror::Error;

/// Raw 32-bit OS status word.
///
/// Layout: bits [9:0] description, [17:10] module, [26:21] summary,
/// [31:27] level. Zero is success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);

    #[inline]
    pub const fn new(level: u32, summary: u32, module: u32, description: u32) -> Self {
        Self(
            (description & 0x3FF)
                | ((module & 0xFF) << 10)
                | ((summary & 0x3F) << 21)
                | ((level & 0x1F) << 27),
        )
    }

    #[inline]
    pub const fn description(self) -> u32 {
        self.0 & 0x3FF
    }

    #[inline]
    pub const fn module(self) -> u32 {
        (self.0 >> 10) & 0xFF
    }

    #[inline]
    pub const fn summary(self) -> u32 {
        (self.0 >> 21) & 0x3F
    }

    #[inline]
    pub const fn level(self) -> u32 {
        (self.0 >> 27) & 0x1F
    }

    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_success() {
            write!(f, "ResultCode::SUCCESS")
        } else {
            write!(
                f,
                "ResultCode(level={}, summary={}, module={}, desc={}, raw=0x{:08X})",
                self.level(),
                self.summary(),
                self.module(),
                self.description(),
                self.0
            )
        }
    }
}

/// Module numbers used by this crate when it raises errors itself.
pub mod module {
    pub const COMMON: u32 = 0;
    pub const KERNEL: u32 = 1;
    pub const GX: u32 = 10;
    pub const FS: u32 = 17;
    pub const APPLICATION: u32 = 254;
}

pub mod level {
    pub const SUCCESS: u32 = 0;
    pub const TEMPORARY: u32 = 26;
    pub const PERMANENT: u32 = 27;
    pub const USAGE: u32 = 28;
}

pub mod summary {
    pub const SUCCESS: u32 = 0;
    pub const OUT_OF_RESOURCE: u32 = 3;
    pub const INVALID_STATE: u32 = 5;
    pub const INVALID_ARGUMENT: u32 = 7;
    pub const WRONG_ARGUMENT: u32 = 8;
}

pub mod description {
    pub const SUCCESS: u32 = 0;
    pub const INVALID_SIZE: u32 = 1004;
    pub const OUT_OF_MEMORY: u32 = 1011;
    pub const INVALID_HANDLE: u32 = 1015;
    pub const OUT_OF_RANGE: u32 = 1021;
}

/// Identifies which call produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    Generic,

    // Library sources
    AllocateBuffer,
    InvalidChannel,
    IoError,
    OperationCancelled,
    ProcessClosing,
    ValidateSmdh,
    InvalidHandle,
    CommandBufferOverflow,

    // Service sources
    AcInit,
    AcGetWifiStatus,
    AmInit,
    AmCancelCiaInstall,
    AmDeleteTitle,
    AmFinishCiaInstall,
    AmGetCiaFileInfo,
    AmGetDeviceId,
    AmGetTitleCount,
    AmGetTitleIdList,
    AmInitializeExternalTitleDatabase,
    AmListTitles,
    AmStartCiaInstall,
    AptDoAppJump,
    AptPrepareToDoAppJump,
    CfgnorInit,
    CfgnorReadData,
    CfgnorWriteData,
    CsndInit,
    CsndExecCmds,
    FsFileRead,
    FsFileWrite,
    FsUserGetArchiveResource,
    FsUserOpenArchive,
    FsUserOpenFile,
    HidUserDisableAccelerometer,
    HidUserDisableGyroscope,
    HidUserEnableAccelerometer,
    HidUserEnableGyroscope,
    IruInit,
    IruRecvData,
    IruSendData,
    NewsInit,
    NewsAddNotification,
    PtmuInit,
    PtmuGetBatteryChargeState,
    PtmuGetBatteryLevel,
    SocInit,
}

/// A decoded OS error, tagged with the call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsError {
    pub source: ErrorSource,
    pub module: u32,
    pub level: u32,
    pub summary: u32,
    pub description: u32,
}

impl OsError {
    /// The canonical all-success value.
    pub const NONE: Self = Self {
        source: ErrorSource::Generic,
        module: module::COMMON,
        level: level::SUCCESS,
        summary: summary::SUCCESS,
        description: description::SUCCESS,
    };

    pub fn decode(source: ErrorSource, code: ResultCode) -> Self {
        Self {
            source,
            module: code.module(),
            level: code.level(),
            summary: code.summary(),
            description: code.description(),
        }
    }

    /// An I/O failure carrying a raw `errno` in the description slot.
    pub fn io(errno: u32) -> Self {
        Self {
            source: ErrorSource::IoError,
            module: module::APPLICATION,
            level: level::PERMANENT,
            summary: summary::INVALID_STATE,
            description: errno,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source: {:?}", self.source)?;

        if self.source == ErrorSource::IoError {
            let io = std::io::Error::from_raw_os_error(self.description as i32);
            return write!(f, "Error: {} (0x{:x})", io, self.description);
        }

        writeln!(
            f,
            "Module: {} (0x{:x})",
            lookup(MODULE_NAMES, self.module),
            self.module
        )?;
        writeln!(
            f,
            "Level: {} (0x{:x})",
            lookup(LEVEL_NAMES, self.level),
            self.level
        )?;
        writeln!(
            f,
            "Summary: {} (0x{:x})",
            lookup(SUMMARY_NAMES, self.summary),
            self.summary
        )?;
        write!(
            f,
            "Description: {} (0x{:x})",
            lookup(DESCRIPTION_NAMES, self.description),
            self.description
        )
    }
}

/// Render an error for display.
pub fn format_error(error: &OsError) -> String {
    error.to_string()
}

fn lookup(table: &[(u32, &'static str)], value: u32) -> &'static str {
    table
        .iter()
        .find(|(v, _)| *v == value)
        .map(|(_, name)| *name)
        .unwrap_or("<unknown>")
}

/// The process-wide last-error slot. Last write wins.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    current: OsError,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self {
            current: OsError::NONE,
        }
    }

    /// Decode `raw` and store it. A zero status clears the slot.
    pub fn set_error(&mut self, source: ErrorSource, raw: u32) {
        let code = ResultCode(raw);
        if code.is_success() {
            self.clear();
        } else {
            self.current = OsError::decode(source, code);
        }
    }

    pub fn set(&mut self, error: OsError) {
        self.current = error;
    }

    pub fn has_error(&self) -> bool {
        !self.current.is_none()
    }

    /// Return the current error and clear the slot.
    pub fn get_error(&mut self) -> OsError {
        std::mem::replace(&mut self.current, OsError::NONE)
    }

    pub fn peek(&self) -> &OsError {
        &self.current
    }

    pub fn clear(&mut self) {
        self.current = OsError::NONE;
    }

    /// Record the outcome of an OS call and report whether it succeeded.
    pub fn check(&mut self, source: ErrorSource, raw: u32) -> bool {
        self.set_error(source, raw);
        !self.has_error()
    }

    pub(crate) fn raise(&mut self, source: ErrorSource, code: ResultCode) {
        self.current = OsError::decode(source, code);
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Status raised when a handle refers to a freed object.
pub const RESULT_INVALID_HANDLE: ResultCode = ResultCode::new(
    level::USAGE,
    summary::INVALID_ARGUMENT,
    module::APPLICATION,
    description::INVALID_HANDLE,
);

/// Status raised when a DMA allocation fails.
pub const RESULT_OUT_OF_MEMORY: ResultCode = ResultCode::new(
    level::PERMANENT,
    summary::OUT_OF_RESOURCE,
    module::APPLICATION,
    description::OUT_OF_MEMORY,
);

/// Status raised when the command list runs out of space.
pub const RESULT_COMMAND_OVERFLOW: ResultCode = ResultCode::new(
    level::TEMPORARY,
    summary::OUT_OF_RESOURCE,
    module::GX,
    description::OUT_OF_RANGE,
);

/// Status raised when a shader binary cannot be parsed.
pub const RESULT_INVALID_SHADER: ResultCode = ResultCode::new(
    level::USAGE,
    summary::WRONG_ARGUMENT,
    module::APPLICATION,
    description::INVALID_SIZE,
);

/// Fatal conditions of context setup.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to allocate {what} ({size} bytes)")]
    OutOfMemory { what: &'static str, size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

const MODULE_NAMES: &[(u32, &str)] = &[
    (0, "common"),
    (1, "kernel"),
    (2, "util"),
    (3, "file server"),
    (4, "loader server"),
    (5, "tcb"),
    (6, "os"),
    (7, "dbg"),
    (8, "dmnt"),
    (9, "pdn"),
    (10, "gx"),
    (11, "i2c"),
    (12, "gpio"),
    (13, "dd"),
    (14, "codec"),
    (15, "spi"),
    (16, "pxi"),
    (17, "fs"),
    (18, "di"),
    (19, "hid"),
    (20, "camera"),
    (21, "pi"),
    (22, "pm"),
    (23, "pm low"),
    (24, "fsi"),
    (25, "srv"),
    (26, "ndm"),
    (27, "nwm"),
    (28, "socket"),
    (29, "ldr"),
    (30, "acc"),
    (31, "romfs"),
    (32, "am"),
    (33, "hio"),
    (34, "updater"),
    (35, "mic"),
    (36, "fnd"),
    (37, "mp"),
    (38, "mpwl"),
    (39, "ac"),
    (40, "http"),
    (41, "dsp"),
    (42, "snd"),
    (43, "dlp"),
    (44, "hio low"),
    (45, "csnd"),
    (46, "ssl"),
    (47, "am low"),
    (48, "nex"),
    (49, "friends"),
    (50, "rdt"),
    (51, "applet"),
    (52, "nim"),
    (53, "ptm"),
    (54, "midi"),
    (55, "mc"),
    (56, "swc"),
    (57, "fatfs"),
    (58, "ngc"),
    (59, "card"),
    (60, "card nor"),
    (61, "sdmc"),
    (62, "boss"),
    (63, "dbm"),
    (64, "config"),
    (65, "ps"),
    (66, "cec"),
    (67, "ir"),
    (68, "uds"),
    (69, "pl"),
    (70, "cup"),
    (71, "gyroscope"),
    (72, "mcu"),
    (73, "ns"),
    (74, "news"),
    (75, "ro"),
    (76, "gd"),
    (77, "card spi"),
    (78, "ec"),
    (79, "web browser"),
    (80, "test"),
    (81, "enc"),
    (82, "pia"),
    (92, "mvd"),
    (96, "qtm"),
    (254, "application"),
    (255, "invalid result value"),
];

const LEVEL_NAMES: &[(u32, &str)] = &[
    (0, "success"),
    (1, "info"),
    (25, "status"),
    (26, "temporary"),
    (27, "permanent"),
    (28, "usage"),
    (29, "reinit"),
    (30, "reset"),
    (31, "fatal"),
];

const SUMMARY_NAMES: &[(u32, &str)] = &[
    (0, "success"),
    (1, "nothing happened"),
    (2, "would block"),
    (3, "out of resource"),
    (4, "not found"),
    (5, "invalid state"),
    (6, "not supported"),
    (7, "invalid argument"),
    (8, "wrong argument"),
    (9, "canceled"),
    (10, "status changed"),
    (11, "internal"),
    (63, "invalid result value"),
];

const DESCRIPTION_NAMES: &[(u32, &str)] = &[
    (0, "success"),
    (2, "invalid memory permissions"),
    (4, "invalid ticket version"),
    (5, "string too big"),
    (6, "access denied"),
    (7, "string too small"),
    (8, "camera busy"),
    (10, "not enough memory"),
    (26, "session closed by remote"),
    (37, "invalid ncch"),
    (39, "invalid title version"),
    (43, "database does not exist"),
    (44, "tried to uninstall system app"),
    (47, "invalid command"),
    (101, "archive not mounted"),
    (105, "request timed out"),
    (106, "invalid signature"),
    (120, "title not found"),
    (141, "gamecard not inserted"),
    (230, "invalid file open flags"),
    (271, "invalid configuration"),
    (391, "ncch hash check failed"),
    (392, "aes verification failed"),
    (393, "invalid database"),
    (395, "save hash check failed"),
    (630, "command permission denied"),
    (702, "invalid path"),
    (761, "incorrect read size"),
    (1000, "invalid selection"),
    (1001, "too large"),
    (1002, "not authorized"),
    (1003, "already done"),
    (1004, "invalid size"),
    (1005, "invalid enum value"),
    (1006, "invalid combination"),
    (1007, "no data"),
    (1008, "busy"),
    (1009, "misaligned address"),
    (1010, "misaligned size"),
    (1011, "out of memory"),
    (1012, "not implemented"),
    (1013, "invalid address"),
    (1014, "invalid pointer"),
    (1015, "invalid handle"),
    (1016, "not initialized"),
    (1017, "already initialized"),
    (1018, "not found"),
    (1019, "cancel requested"),
    (1020, "already exists"),
    (1021, "out of range"),
    (1022, "timeout"),
    (1023, "invalid result value"),
];
