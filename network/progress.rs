use std::fmt;

/// Stages reported while sweeping candidate soft-threshold powers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThresholdProgressStage {
    Connectivity,
    FitIndex,
}

impl ThresholdProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Connectivity => "block-wise connectivity",
            Self::FitIndex => "scale-free fit per power",
        }
    }
}

impl fmt::Display for ThresholdProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress of the power sweep.
///
/// `Connectivity` advances in genes, `FitIndex` in powers.
pub trait ThresholdProgressObserver {
    fn on_stage_start(&mut self, stage: ThresholdProgressStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&mut self, stage: ThresholdProgressStage, processed: usize) {
        let _ = (stage, processed);
    }
    fn on_stage_finish(&mut self, stage: ThresholdProgressStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopThresholdProgress;

impl ThresholdProgressObserver for NoopThresholdProgress {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_describe_themselves() {
        assert_eq!(
            ThresholdProgressStage::Connectivity.to_string(),
            "block-wise connectivity"
        );
        assert_eq!(
            ThresholdProgressStage::FitIndex.to_string(),
            "scale-free fit per power"
        );
    }
}
