use std::fmt;
use std::str::FromStr;

/// One of the supported FreeDV OFDM data modes.
///
/// `Mode` is a plain tag: the frame-shape properties it implies (sample
/// rate, bytes per frame, sample counts) are reported at runtime by the
/// codec instance opened for that mode, not hardcoded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    DataC1,
    DataC3,
    DataC4,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::DataC1, Mode::DataC3, Mode::DataC4];

    pub fn name(&self) -> &'static str {
        match self {
            Mode::DataC1 => "DATAC1",
            Mode::DataC3 => "DATAC3",
            Mode::DataC4 => "DATAC4",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMode(pub String);

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown modem mode '{}'", self.0)
    }
}

impl std::error::Error for UnknownMode {}

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DATAC1" => Ok(Mode::DataC1),
            "DATAC3" => Ok(Mode::DataC3),
            "DATAC4" => Ok(Mode::DataC4),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for mode in Mode::ALL {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!("datac3".parse::<Mode>().unwrap(), Mode::DataC3);
    }

    #[test]
    fn from_str_rejects_unknown_mode() {
        assert!("datac9".parse::<Mode>().is_err());
    }
}
