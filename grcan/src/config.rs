//! Channel configuration and bit timing

use core::ops::RangeInclusive;
use fugit::{HertzU32, MillisDurationU32};

/// Sample point used when none is requested, in percent of the bit time
pub const DEFAULT_SAMPLE_POINT: u8 = 80;

/// Configuration for a channel
///
/// The configuration can only be changed while the channel is stopped; it is
/// written to the core by [`Channel::start`].
///
/// [`Channel::start`]: crate::bus::Channel::start
#[derive(Copy, Clone, Debug)]
pub struct ChannelConfig {
    /// Listen only; transmission is disabled
    pub silent: bool,
    /// Abort transmission when an AHB error occurs
    pub abort: bool,
    /// Bus (transceiver) selection
    pub selection: Selection,
    /// Receive behaviour of [`Channel::read`]
    ///
    /// [`Channel::read`]: crate::bus::Channel::read
    pub rx: TransferConfig,
    /// Transmit behaviour of [`Channel::write`]
    ///
    /// [`Channel::write`]: crate::bus::Channel::write
    pub tx: TransferConfig,
    /// A blocking call in complete mode waits for at most
    /// `ring capacity / wait_limit_divisor` slots before it retries the
    /// transfer. Must not be 0.
    pub wait_limit_divisor: u8,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            silent: false,
            abort: false,
            selection: Selection::default(),
            rx: TransferConfig::default(),
            tx: TransferConfig::default(),
            wait_limit_divisor: 2,
        }
    }
}

/// Bus selection of a core with two transceivers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Select bus 1 instead of bus 0
    pub selection: bool,
    /// Enable transceiver 0
    pub enable0: bool,
    /// Enable transceiver 1
    pub enable1: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            selection: false,
            enable0: false,
            enable1: true,
        }
    }
}

/// Blocking behaviour of one direction
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferConfig {
    /// Suspend the caller until at least one frame could be transferred
    pub blocking: bool,
    /// When blocking, suspend until every requested frame was transferred
    pub complete: bool,
    /// Give up waiting after this long. `None` waits until progress is made or
    /// the link goes down.
    pub timeout: Option<MillisDurationU32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            blocking: true,
            complete: false,
            timeout: None,
        }
    }
}

/// Bit timing register values
///
/// Values are written to the register fields as they are; `scaler` is the
/// prescaler minus one and `bpr` selects an additional division by
/// `1 << bpr` (GRCAN only).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Timing {
    /// Prescaler minus one
    pub scaler: u8,
    /// Phase segment 1 in time quanta
    pub ps1: u8,
    /// Phase segment 2 in time quanta
    pub ps2: u8,
    /// Re-synchronisation jump width in time quanta
    pub rsj: u8,
    /// Power of two prescaler extension
    pub bpr: u8,
}

impl Timing {
    /// Returns the number of time quanta that make up one bit time
    pub fn time_quanta_per_bit(&self) -> u32 {
        1 + u32::from(self.ps1) + u32::from(self.ps2)
    }

    /// Effective clock division of one time quantum
    pub fn prescaler(&self) -> u32 {
        (u32::from(self.scaler) + 1) << self.bpr
    }

    /// Bit rate these values produce with a core clock of `core_clock`
    pub fn bitrate(&self, core_clock: HertzU32) -> HertzU32 {
        core_clock / (self.prescaler() * self.time_quanta_per_bit())
    }

    /// Check the values against the ranges of a timing register
    pub fn check(&self, valid: &BitTimingRanges) -> Result<(), BitTimingError> {
        if !valid.phase_seg_1.contains(&self.ps1.into()) {
            Err(BitTimingError::PhaseSeg1OutOfRange(valid.phase_seg_1.clone()))
        } else if !valid.phase_seg_2.contains(&self.ps2.into()) {
            Err(BitTimingError::PhaseSeg2OutOfRange(valid.phase_seg_2.clone()))
        } else if !valid.sjw.contains(&self.rsj.into()) {
            Err(BitTimingError::SynchronizationJumpWidthOutOfRange(
                valid.sjw.clone(),
            ))
        } else if self.bpr > valid.max_bpr {
            Err(BitTimingError::PrescalerOutOfRange(1..=valid.max_prescaler))
        } else {
            Ok(())
        }
    }
}

/// Misconfigurations of [`Timing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitTimingError {
    /// Requested bit rate is outside the wrapped `RangeInclusive`
    BitrateOutOfRange(RangeInclusive<u32>),
    /// SJW is outside the wrapped `RangeInclusive`
    SynchronizationJumpWidthOutOfRange(RangeInclusive<u32>),
    /// Phase segment 1 is outside the wrapped `RangeInclusive`
    PhaseSeg1OutOfRange(RangeInclusive<u32>),
    /// Phase segment 2 is outside the wrapped `RangeInclusive`
    PhaseSeg2OutOfRange(RangeInclusive<u32>),
    /// Prescaler is outside the wrapped `RangeInclusive`
    PrescalerOutOfRange(RangeInclusive<u32>),
    /// No prescaler gets within 10 % of the requested bit rate
    NoValidPrescaler {
        /// Provided core clock
        core_clock: HertzU32,
        /// Requested bit rate
        bitrate: HertzU32,
    },
}

/// Valid values of a timing register
#[derive(Clone, Debug)]
pub struct BitTimingRanges {
    /// Bit rates the timing calculation accepts, in Hz
    pub bitrate: RangeInclusive<u32>,
    /// Phase segment 1
    pub phase_seg_1: RangeInclusive<u32>,
    /// Phase segment 2
    pub phase_seg_2: RangeInclusive<u32>,
    /// Re-synchronisation jump width
    pub sjw: RangeInclusive<u32>,
    /// Largest effective prescaler
    pub max_prescaler: u32,
    /// Largest `bpr` value; 0 if the register has no such field
    pub max_bpr: u8,
}

/// `CONF` register of a GRCAN core
pub const GRCAN_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    bitrate: 5_000..=1_000_000,
    phase_seg_1: 1..=15,
    phase_seg_2: 2..=8,
    sjw: 1..=4,
    max_prescaler: 2048,
    max_bpr: 3,
};

/// `NBTR` register of a GRCANFD core
pub const GRCANFD_NOMINAL_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    bitrate: 5_000..=1_000_000,
    phase_seg_1: 2..=63,
    phase_seg_2: 2..=16,
    sjw: 1..=16,
    max_prescaler: 256,
    max_bpr: 0,
};

/// `FDBTR` register of a GRCANFD core
pub const GRCANFD_DATA_TIMING_RANGES: BitTimingRanges = BitTimingRanges {
    bitrate: 5_000..=8_000_000,
    phase_seg_1: 1..=15,
    phase_seg_2: 2..=8,
    sjw: 1..=8,
    max_prescaler: 256,
    max_bpr: 0,
};

impl BitTimingRanges {
    /// Split a prescaler into `scaler` and `bpr`. Above 256 the prescaler
    /// must be divisible by the power of two selected by `bpr`.
    fn encode_prescaler(&self, prescaler: u32) -> Option<(u8, u8)> {
        if prescaler == 0 || prescaler > self.max_prescaler {
            return None;
        }
        (0..=self.max_bpr).find_map(|bpr| {
            let step = 1 << bpr;
            if prescaler <= 256 << bpr && prescaler % step == 0 {
                u8::try_from(prescaler / step - 1).ok().map(|scaler| (scaler, bpr))
            } else {
                None
            }
        })
    }
}

/// Compute timing register values for `bitrate`
///
/// Searches every bit time the ranges allow for the prescaler giving the
/// smallest bit rate error, then splits the bit time around the requested
/// sample point. Sample points outside 50..=99 % fall back to
/// [`DEFAULT_SAMPLE_POINT`]; bit rates above 750 kbit/s or below 11.25 kbit/s
/// always use 75 %.
pub fn compute_timing(
    bitrate: HertzU32,
    core_clock: HertzU32,
    sample_point: u8,
    valid: &BitTimingRanges,
) -> Result<Timing, BitTimingError> {
    let baud = bitrate.to_Hz();
    let core = core_clock.to_Hz();
    if !valid.bitrate.contains(&baud) {
        return Err(BitTimingError::BitrateOutOfRange(valid.bitrate.clone()));
    }
    let sample_point = if baud > 750_000 || baud < 11_250 {
        75
    } else if (50..=99).contains(&sample_point) {
        sample_point
    } else {
        DEFAULT_SAMPLE_POINT
    };

    let min_quanta = 1 + valid.phase_seg_1.start() + valid.phase_seg_2.start();
    let max_quanta = 1 + valid.phase_seg_1.end() + valid.phase_seg_2.end();
    let mut best: Option<(u32, u32, (u8, u8))> = None;
    for quanta in min_quanta..=max_quanta {
        let per_quantum = u64::from(quanta) * u64::from(baud);
        let prescaler = ((u64::from(core) + per_quantum / 2) / per_quantum) as u32;
        let Some(encoded) = valid.encode_prescaler(prescaler) else {
            continue;
        };
        let error = baud.abs_diff(core / (prescaler * quanta));
        if best.map_or(true, |(best_error, ..)| error <= best_error) {
            best = Some((error, quanta, encoded));
        }
    }
    let best = best.filter(|(error, ..)| *error == 0 || baud / error >= 10);
    let Some((error, quanta, (scaler, bpr))) = best else {
        return Err(BitTimingError::NoValidPrescaler {
            core_clock,
            bitrate,
        });
    };
    log::trace!("bit rate {} Hz: {} quanta, error {} Hz", baud, quanta, error);

    let ps2_min = *valid.phase_seg_2.start();
    let ps2_max = *valid.phase_seg_2.end();
    let ps1_max = *valid.phase_seg_1.end();
    let mut ps2 = (quanta * (100 - u32::from(sample_point)) / 100).clamp(ps2_min, ps2_max);
    let mut ps1 = quanta - 1 - ps2;
    if ps1 > ps1_max {
        ps1 = ps1_max;
        ps2 = quanta - 1 - ps1;
    }
    let timing = Timing {
        scaler,
        ps1: ps1 as u8,
        ps2: ps2 as u8,
        rsj: 1,
        bpr,
    };
    timing.check(valid)?;
    Ok(timing)
}
