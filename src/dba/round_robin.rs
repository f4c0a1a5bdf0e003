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

//! Round-robin allocation policy.
//!
//! Walks all T-CONTs in provisioning order regardless of their traffic
//! class, grants each its reported backlog up to a per-service maximum
//! and polls idle T-CONTs with a one-word grant. The traversal cursor
//! survives across BW-MAPs, so a frame boundary never favors the
//! T-CONTs at the start of the list.

use super::Bursts;
use super::CycleContext;
use super::DbaPolicy;
use crate::tcont::TcontOltMap;
use crate::Config;

pub struct RoundRobin {
    /// Cursor of the round-robin traversal.
    last_index: usize,

    /// Index the current cycle started from, to detect a full traversal.
    first_index: usize,

    /// Largest grant for one T-CONT in one service. Unit: word.
    max_service_size: u32,
}

impl RoundRobin {
    pub fn new(conf: &Config) -> RoundRobin {
        RoundRobin {
            last_index: 0,
            first_index: 0,
            max_service_size: conf.rr_max_service_size,
        }
    }
}

impl DbaPolicy for RoundRobin {
    fn on_tcont_added(&mut self, _tconts: &mut TcontOltMap, _index: usize) {}

    fn first_tcont(&mut self, _tconts: &TcontOltMap) -> usize {
        self.first_index = self.last_index;
        self.last_index
    }

    fn next_tcont(&mut self, _tconts: &TcontOltMap) -> usize {
        self.last_index
    }

    fn amount_to_upload(
        &mut self,
        tconts: &mut TcontOltMap,
        index: usize,
        _bursts: &mut Bursts,
        ctx: &CycleContext,
    ) -> u32 {
        let tcont = &tconts[index];
        let mut size2_assign = tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);

        if size2_assign > 0 {
            // One word for the piggybacked queue status report.
            size2_assign += 1;
            if size2_assign > self.max_service_size {
                size2_assign = self.max_service_size;
            } else if size2_assign < 4 {
                // Smallest allocation for receiving data from an ONU.
                size2_assign = 4;
            }
        } else {
            // Poll the idle T-CONT for its queue status.
            size2_assign = 1;
        }

        size2_assign
    }

    fn all_tconts_served(&mut self, tconts: &TcontOltMap) -> bool {
        self.last_index += 1;
        if self.last_index >= tconts.len() {
            self.last_index = 0;
        }

        // The cursor has moved past the T-CONT just considered; once it
        // comes back around to where the cycle started, everyone has had
        // a turn.
        self.first_index == self.last_index
    }
}
