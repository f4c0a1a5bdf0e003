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

//! ONU-side upstream scheduling.
//!
//! When a grant arrives, the ONU must decide which of the connections
//! multiplexed into the granted T-CONT fills the burst. The scheduler
//! picks one connection at a time together with the number of bytes it
//! may send.

use std::str::FromStr;

use crate::tcont::TcontOnu;
use crate::Config;
use crate::Error;
use crate::Result;

/// Available ONU upstream scheduling disciplines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnuSchedulerAlgorithm {
    /// Round robin over the connections of a T-CONT.
    RoundRobin,
}

impl FromStr for OnuSchedulerAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<OnuSchedulerAlgorithm> {
        if algor.eq_ignore_ascii_case("round_robin") {
            Ok(OnuSchedulerAlgorithm::RoundRobin)
        } else {
            Err(Error::InvalidConfig("unknown onu scheduler algorithm".into()))
        }
    }
}

/// One upstream scheduling discipline.
pub trait OnuUsScheduler {
    /// Pick the connection to serve next and the amount it may upload.
    /// Unit: byte. `None` when no connection has data queued.
    fn select_conn_to_serve(&mut self, tcont: &TcontOnu) -> Option<(usize, u32)>;
}

/// Build an ONU upstream scheduler from the configuration.
pub fn build_onu_scheduler(conf: &Config) -> Box<dyn OnuUsScheduler> {
    match conf.onu_scheduler_algorithm {
        OnuSchedulerAlgorithm::RoundRobin =>
            Box::new(scheduler_rr::SchedulerRoundRobin::new(conf)),
    }
}


mod scheduler_rr;

pub use self::scheduler_rr::SchedulerRoundRobin;
