//! Signal parameters shared by every model: channel, output and time counts.
//!
//! Each count may be given directly or derived from richer recording metadata (channel
//! descriptors, window length and sampling frequency). Both forms may be given at once as
//! long as they agree.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Descriptor of one recorded channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub ch_name: String,
}

impl ChannelInfo {
    pub fn new(ch_name: impl Into<String>) -> Self {
        Self {
            ch_name: ch_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalArgs<'a> {
    pub n_chans: Option<usize>,
    pub n_outputs: Option<usize>,
    pub n_times: Option<usize>,
    pub chs_info: Option<&'a [ChannelInfo]>,
    pub input_window_seconds: Option<f64>,
    pub sfreq: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalParams {
    pub n_chans: usize,
    pub n_outputs: usize,
    pub n_times: usize,
}

impl SignalArgs<'_> {
    pub fn resolve(&self) -> Result<SignalParams> {
        let n_chans = self.resolve_chans()?;
        let n_times = self.resolve_times()?;
        let n_outputs = self
            .n_outputs
            .ok_or(Error::MissingSignalParam("n_outputs"))?;

        if n_chans == 0 {
            return Err(Error::InconsistentSignal("n_chans must be positive".into()));
        }
        if n_outputs == 0 {
            return Err(Error::InconsistentSignal(
                "n_outputs must be positive".into(),
            ));
        }

        Ok(SignalParams {
            n_chans,
            n_outputs,
            n_times,
        })
    }

    fn resolve_chans(&self) -> Result<usize> {
        let from_info = self.chs_info.map(|info| info.len());

        match (self.n_chans, from_info) {
            (Some(n), Some(m)) if n != m => Err(Error::InconsistentSignal(format!(
                "n_chans is {} but chs_info describes {} channels",
                n, m
            ))),
            (Some(n), _) | (None, Some(n)) => Ok(n),
            (None, None) => Err(Error::MissingSignalParam("n_chans")),
        }
    }

    fn resolve_times(&self) -> Result<usize> {
        let from_window = match (self.input_window_seconds, self.sfreq) {
            (Some(seconds), Some(sfreq)) => {
                if !(seconds > 0.0 && sfreq > 0.0) {
                    return Err(Error::InconsistentSignal(format!(
                        "input_window_seconds ({}) and sfreq ({}) must be positive",
                        seconds, sfreq
                    )));
                }
                Some((seconds * sfreq) as usize)
            }
            _ => None,
        };

        match (self.n_times, from_window) {
            (Some(n), Some(m)) if n != m => Err(Error::InconsistentSignal(format!(
                "n_times is {} but input_window_seconds * sfreq gives {}",
                n, m
            ))),
            (Some(n), _) | (None, Some(n)) => Ok(n),
            (None, None) => Err(Error::MissingSignalParam("n_times")),
        }
    }
}
