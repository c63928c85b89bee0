use std::fmt;

/// Why a package was selected for build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildReason {
    FullBuild,
    NoMarker,
    SourceChanged,
    DescriptorChanged,
    PreviousFailure,
    NoUsableRecord,
    DetectionFailed(String),
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildReason::FullBuild => f.write_str("activated as part of full build"),
            BuildReason::NoMarker => f.write_str("no prior version marker"),
            BuildReason::SourceChanged => f.write_str("source changed"),
            BuildReason::DescriptorChanged => f.write_str("descriptor changed"),
            BuildReason::PreviousFailure => f.write_str("previous build failed"),
            BuildReason::NoUsableRecord => f.write_str("no usable prior record"),
            BuildReason::DetectionFailed(err) => write!(f, "change detection failed: {}", err),
        }
    }
}

/// Why a package was left out of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UpToDate,
    UnchangedSinceMarker,
    Superseded,
    InFlight,
    InfrastructureError,
    DependencyError,
}

impl SkipReason {
    /// Skips that leave an error for someone to fix.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SkipReason::InfrastructureError | SkipReason::DependencyError
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::UpToDate => "no changes since last successful build",
            SkipReason::UnchangedSinceMarker => "no changes since version marker",
            SkipReason::Superseded => "superseded by a newer in-flight job",
            SkipReason::InFlight => "no material change; let the in-flight job finish",
            SkipReason::InfrastructureError => "unresolved infrastructure error",
            SkipReason::DependencyError => "dependency carries unresolved error",
        };
        f.write_str(s)
    }
}

/// Outcome of checking a single package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Build {
        reason: BuildReason,
        dependencies_changed: bool,
    },
    Skip(SkipReason),
}

impl Decision {
    pub(crate) fn build(reason: BuildReason) -> Self {
        Decision::Build {
            reason,
            dependencies_changed: false,
        }
    }
}
