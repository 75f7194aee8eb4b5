//! Stochastic fault injection, compiled in only under the
//! `fault-injection` feature. Grounded on `spec.md` §6's `DROPRX`/`DROPTX`/
//! `TRASHRX`/`TRASHTX` environment variables.

use rand::Rng;

/// Percentage (0..100) knobs read from the environment at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInjection {
    pub drop_rx: u8,
    pub drop_tx: u8,
    pub trash_rx: u8,
    pub trash_tx: u8,
}

fn percent_from_env(var: &str) -> u8 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .map(|v| v.min(100))
        .unwrap_or(0)
}

impl FaultInjection {
    pub fn from_env() -> FaultInjection {
        FaultInjection {
            drop_rx: percent_from_env("DROPRX"),
            drop_tx: percent_from_env("DROPTX"),
            trash_rx: percent_from_env("TRASHRX"),
            trash_tx: percent_from_env("TRASHTX"),
        }
    }

    fn roll(percent: u8) -> bool {
        percent > 0 && rand::thread_rng().gen_range(0..100) < percent
    }

    pub fn should_drop_rx(&self) -> bool {
        Self::roll(self.drop_rx)
    }

    pub fn should_drop_tx(&self) -> bool {
        Self::roll(self.drop_tx)
    }

    /// Flip one random bit of `frame`, in place, if the trash roll hits.
    pub fn maybe_trash_rx(&self, frame: &mut [u8]) {
        if !frame.is_empty() && Self::roll(self.trash_rx) {
            Self::trash(frame);
        }
    }

    pub fn maybe_trash_tx(&self, frame: &mut [u8]) {
        if !frame.is_empty() && Self::roll(self.trash_tx) {
            Self::trash(frame);
        }
    }

    fn trash(frame: &mut [u8]) {
        let idx = rand::thread_rng().gen_range(0..frame.len());
        frame[idx] ^= 0xff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_percent_never_fires() {
        let f = FaultInjection::default();
        assert!(!f.should_drop_rx());
        assert!(!f.should_drop_tx());
    }

    #[test]
    fn hundred_percent_always_fires() {
        let f = FaultInjection {
            drop_rx: 100,
            drop_tx: 100,
            trash_rx: 100,
            trash_tx: 100,
        };
        assert!(f.should_drop_rx());
        assert!(f.should_drop_tx());
        let mut frame = [0u8; 4];
        f.maybe_trash_rx(&mut frame);
        assert_ne!(frame, [0u8; 4]);
    }
}
