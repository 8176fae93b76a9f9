use crate::{common::*, config::AvaVersion};

/// The supported datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
    #[serde(rename = "ucf24")]
    Ucf24,
    #[serde(rename = "jhmdb21")]
    Jhmdb21,
    #[serde(rename = "ava_v2.1")]
    AvaV2_1,
    #[serde(rename = "ava_v2.2")]
    AvaV2_2,
    #[serde(rename = "ava_pose")]
    AvaPose,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 5] = [
        Self::Ucf24,
        Self::Jhmdb21,
        Self::AvaV2_1,
        Self::AvaV2_2,
        Self::AvaPose,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ucf24 => "ucf24",
            Self::Jhmdb21 => "jhmdb21",
            Self::AvaV2_1 => "ava_v2.1",
            Self::AvaV2_2 => "ava_v2.2",
            Self::AvaPose => "ava_pose",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            Self::Ucf24 => 24,
            Self::Jhmdb21 => 21,
            Self::AvaV2_1 | Self::AvaV2_2 => 80,
            Self::AvaPose => 14,
        }
    }

    /// The AVA annotation version, `None` for UCF24 and JHMDB21.
    pub fn ava_version(&self) -> Option<AvaVersion> {
        match self {
            Self::Ucf24 | Self::Jhmdb21 => None,
            Self::AvaV2_1 => Some(AvaVersion::V2_1),
            Self::AvaV2_2 => Some(AvaVersion::V2_2),
            Self::AvaPose => Some(AvaVersion::Pose),
        }
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == name)
            .copied()
            .ok_or_else(|| {
                format_err!(
                    "unknown dataset '{}', expect one of {}",
                    name,
                    Self::ALL.iter().map(|kind| kind.as_str()).join(", ")
                )
            })
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() -> Result<()> {
        for kind in DatasetKind::ALL {
            assert_eq!(kind.as_str().parse::<DatasetKind>()?, kind);
        }
        assert_eq!("ava_pose".parse::<DatasetKind>()?.num_classes(), 14);
        assert_eq!("jhmdb21".parse::<DatasetKind>()?.num_classes(), 21);
        assert!("kinetics".parse::<DatasetKind>().is_err());
        Ok(())
    }

    #[test]
    fn serde_names_match_display() -> Result<()> {
        for kind in DatasetKind::ALL {
            let text = serde_json::to_string(&kind)?;
            assert_eq!(text, format!("\"{}\"", kind));
        }
        Ok(())
    }
}
