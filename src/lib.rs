// Copyright (c) 2024 The XGPON-DBA Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Upstream dynamic bandwidth allocation (DBA) for XG-PON access networks.
//!
//! In XG-PON a single upstream wavelength is time-shared by all ONUs. Once
//! per 125us frame slot the OLT broadcasts a BW-MAP, the schedule telling
//! every ONU when it may burst and for how many words. This crate models
//! the allocation subsystem on both sides of the link:
//!
//! * [`DbaEngine`] is the OLT-side cycle driver. It tracks provisioned
//!   T-CONTs, accepts their DBRU status reports and produces one BW-MAP
//!   per frame slot through a pluggable [`DbaPolicy`].
//! * Four policies are provided: plain round robin, the timer-gated GIANT
//!   scheme, the deficit-replaying XGIANT scheme and EBU, which adds
//!   per-class excess bandwidth pools.
//! * [`TcontOnu`] and [`OnuUsScheduler`] model the ONU side: occupancy
//!   reporting and the choice of which connection fills a granted burst.
//!
//! The crate is single-threaded and consumes time as nanosecond `u64`
//! values passed into each call; it never reads a clock. Bit-level
//! framing, encryption and PLOAM/OMCI message content are out of scope.
//!
//! ## Example
//!
//! ```
//! use xgpon_dba::Config;
//! use xgpon_dba::DbaEngine;
//! use xgpon_dba::Dbru;
//! use xgpon_dba::QosParameters;
//! use xgpon_dba::TcontType;
//!
//! let mut conf = Config::new()?;
//! conf.set_dba_algorithm("xgiant")?;
//!
//! let mut engine = DbaEngine::new(&conf);
//! let qos = QosParameters {
//!     fixed_bw: 10_000_000,
//!     assured_bw: 100_000_000,
//!     non_assured_bw: 100_000_000,
//!     best_effort_bw: 100_000_000,
//!     min_interval: 1,
//!     max_interval: 4,
//! };
//!
//! // One ONU brings a stride-4 group of T-CONTs, one per class.
//! for (i, tcont_type) in [
//!     TcontType::Type1,
//!     TcontType::Type2,
//!     TcontType::Type3,
//!     TcontType::Type4,
//! ]
//! .iter()
//! .enumerate()
//! {
//!     engine.add_tcont(1024 + i as u16, 1, *tcont_type, qos)?;
//! }
//!
//! engine.receive_status_report(1027, Dbru::new(500), 0)?;
//! let map = engine.generate_bwmap(125_000)?;
//! assert!(!map.is_empty());
//! # Ok::<(), xgpon_dba::Error>(())
//! ```

use std::time::Duration;

pub use crate::dba::Bursts;
pub use crate::dba::CycleContext;
pub use crate::dba::DbaAlgorithm;
pub use crate::dba::DbaEngine;
pub use crate::dba::DbaMetricsSink;
pub use crate::dba::DbaPolicy;
pub use crate::dba::MAX_TCONT_PER_BURST;
pub use crate::dba::MAX_TCONT_PER_BWMAP;
pub use crate::dba::MAX_TCONT_PER_ONU;
pub use crate::error::Error;
pub use crate::onu_scheduler::build_onu_scheduler;
pub use crate::onu_scheduler::OnuSchedulerAlgorithm;
pub use crate::onu_scheduler::OnuUsScheduler;
pub use crate::onu_scheduler::SchedulerRoundRobin;
pub use crate::phy::Phy;
pub use crate::qos::QosParameters;
pub use crate::qos::TcontType;
pub use crate::report::BurstProfile;
pub use crate::report::BwAllocation;
pub use crate::report::BwMap;
pub use crate::report::Dbru;
pub use crate::report::BURST_CONTINUATION;
pub use crate::tcont::ConnectionSender;
pub use crate::tcont::TcontOlt;
pub use crate::tcont::TcontOltMap;
pub use crate::tcont::TcontOnu;

/// A specialized [`Result`] type for operations of this crate.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration of the allocation subsystem.
///
/// All tuning values default to the XG-PON1 reference numbers.
#[derive(Clone, Debug)]
pub struct Config {
    /// The OLT-side allocation policy.
    pub(crate) dba_algorithm: DbaAlgorithm,

    /// The ONU-side upstream scheduling discipline.
    pub(crate) onu_scheduler_algorithm: OnuSchedulerAlgorithm,

    /// Physical layer parameters shared by all devices.
    pub(crate) phy: Phy,

    /// Burst profile the ONUs transmit with.
    pub(crate) burst_profile: BurstProfile,

    /// Logical round trip time between the OLT and its ONUs.
    pub(crate) logic_rtt: Duration,

    /// Round robin: largest grant for one T-CONT in one service.
    /// Unit: word.
    pub(crate) rr_max_service_size: u32,

    /// GIANT: share of the T3 allocation granted in the GIR round.
    pub(crate) giant_t3_gir_fraction: f64,

    /// GIANT: share of the T3 allocation granted in the PIR round.
    pub(crate) giant_t3_pir_fraction: f64,

    /// XGIANT: share of the T3 allocation granted in the first round.
    pub(crate) xgiant_t3_gir_fraction: f64,

    /// XGIANT: share of the T3 allocation granted in the second round.
    pub(crate) xgiant_t3_pir_fraction: f64,

    /// XGIANT: a replayed deficit larger than this multiple of the fair
    /// share collapses back to one share.
    pub(crate) xgiant_deficit_cap_multiplier: u32,

    /// EBU: share of the T3 entitlement available in the GIR round.
    pub(crate) ebu_t3_gir_fraction: f64,

    /// EBU: share of the T3 entitlement available in the PIR round.
    pub(crate) ebu_t3_pir_fraction: f64,

    /// EBU: share of the T4 entitlement replenished per interval.
    pub(crate) ebu_t4_fraction: f64,

    /// EBU: smallest service interval in the system; the excess pools are
    /// flushed every this many frame slots. Unit: frame slot.
    pub(crate) ebu_minimum_si: u16,

    /// ONU scheduler: largest amount one connection may upload in one
    /// service. Unit: byte.
    pub(crate) onu_max_service_size: u32,
}

impl Config {
    pub fn new() -> Result<Config> {
        Ok(Config {
            dba_algorithm: DbaAlgorithm::RoundRobin,
            onu_scheduler_algorithm: OnuSchedulerAlgorithm::RoundRobin,
            phy: Phy::default(),
            burst_profile: BurstProfile::default(),
            logic_rtt: Duration::from_millis(2),
            rr_max_service_size: 9718,
            giant_t3_gir_fraction: 0.2,
            giant_t3_pir_fraction: 0.6,
            xgiant_t3_gir_fraction: 0.2,
            xgiant_t3_pir_fraction: 0.8,
            xgiant_deficit_cap_multiplier: 3,
            ebu_t3_gir_fraction: 0.2,
            ebu_t3_pir_fraction: 0.6,
            ebu_t4_fraction: 0.5,
            ebu_minimum_si: 5,
            onu_max_service_size: 40_000,
        })
    }

    /// Set the OLT-side allocation policy by name.
    ///
    /// The available policies are `round_robin`, `giant`, `xgiant` and
    /// `ebu` (ASCII case insensitive).
    pub fn set_dba_algorithm(&mut self, name: &str) -> Result<()> {
        self.dba_algorithm = name.parse()?;
        Ok(())
    }

    /// Set the ONU-side upstream scheduling discipline by name.
    pub fn set_onu_scheduler_algorithm(&mut self, name: &str) -> Result<()> {
        self.onu_scheduler_algorithm = name.parse()?;
        Ok(())
    }

    /// Set the physical layer parameters.
    pub fn set_phy(&mut self, phy: Phy) {
        self.phy = phy;
    }

    /// Set the burst profile the ONUs transmit with.
    pub fn set_burst_profile(&mut self, profile: BurstProfile) {
        self.burst_profile = profile;
    }

    /// Set the logical round trip time between the OLT and its ONUs.
    pub fn set_logic_rtt(&mut self, rtt: Duration) {
        self.logic_rtt = rtt;
    }

    /// Set the largest round robin grant for one T-CONT. Unit: word.
    pub fn set_rr_max_service_size(&mut self, words: u32) {
        self.rr_max_service_size = words;
    }

    /// Set the XGIANT deficit replay cap, as a multiple of the fair share.
    pub fn set_xgiant_deficit_cap_multiplier(&mut self, multiplier: u32) {
        self.xgiant_deficit_cap_multiplier = multiplier;
    }

    /// Set the EBU excess pool flush interval. Unit: frame slot. The
    /// interval must be at least one slot.
    pub fn set_ebu_minimum_si(&mut self, si: u16) -> Result<()> {
        if si < 1 {
            return Err(Error::InvalidConfig("ebu minimum si must be positive".into()));
        }
        self.ebu_minimum_si = si;
        Ok(())
    }

    /// Set the largest per-connection upload in one service. Unit: byte.
    pub fn set_onu_max_service_size(&mut self, bytes: u32) {
        self.onu_max_service_size = bytes;
    }
}


mod error;
mod phy;
mod qos;
mod report;

#[path = "dba/dba.rs"]
mod dba;

#[path = "onu_scheduler/onu_scheduler.rs"]
mod onu_scheduler;

#[path = "tcont/tcont.rs"]
mod tcont;
