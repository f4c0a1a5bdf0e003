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

//! OLT-side T-CONT bookkeeping.

use std::collections::VecDeque;

use super::HISTORY_TO_MAINTAIN;
use crate::qos::QosParameters;
use crate::qos::TcontType;
use crate::report::BwAllocation;
use crate::report::Dbru;

/// Value at which a GIR or PIR timer is considered expired.
pub const TIMER_EXPIRE_VALUE: u16 = 0;

/// One T-CONT as tracked by the OLT.
///
/// Holds the provisioned QoS, the per-cycle timers driven by the policies,
/// the received status reports and the grants already sent downstream.
pub struct TcontOlt {
    alloc_id: u16,
    onu_id: u16,
    tcont_type: TcontType,
    qos: QosParameters,

    /// Rate the active class of this T-CONT is entitled to. Unit: bps.
    allocated_rate: u32,

    /// Allocation size for one service of this T-CONT. Unit: word.
    allocation_words: u32,

    /// Service interval the PIR timer reloads from. Unit: frame slot.
    pir_si: u16,

    /// Remaining slots until this T-CONT may be served at peak rate.
    pir_timer: u16,

    /// Remaining slots until this T-CONT may be served at guaranteed rate.
    gir_timer: u16,

    /// Virtual word counter of the excess bandwidth policy. May go
    /// negative when a class overdraws its pool.
    variable_word: i64,

    /// Time at which a DBRU was last solicited from this T-CONT.
    last_polling_time: u64,

    /// Received status reports, oldest first.
    reports: VecDeque<Dbru>,

    /// Grants sent downstream, oldest first.
    allocations: VecDeque<BwAllocation>,
}

impl TcontOlt {
    pub fn new(alloc_id: u16, onu_id: u16, tcont_type: TcontType, qos: QosParameters) -> TcontOlt {
        TcontOlt {
            alloc_id,
            onu_id,
            tcont_type,
            qos,
            allocated_rate: 0,
            allocation_words: 0,
            pir_si: 0,
            pir_timer: 0,
            gir_timer: 0,
            variable_word: 0,
            last_polling_time: 0,
            reports: VecDeque::new(),
            allocations: VecDeque::new(),
        }
    }

    pub fn alloc_id(&self) -> u16 {
        self.alloc_id
    }

    pub fn onu_id(&self) -> u16 {
        self.onu_id
    }

    pub fn tcont_type(&self) -> TcontType {
        self.tcont_type
    }

    pub fn qos(&self) -> &QosParameters {
        &self.qos
    }

    /// Derive the class rate and timer reload values from the provisioned
    /// QoS. Called once when a policy adopts the T-CONT.
    ///
    /// T1 and T2 are paced by their maximum service interval. T3 and T4
    /// are granted at the minimum interval and topped up by the timers.
    pub fn calculate_qos_parameters(&mut self) {
        match self.tcont_type {
            TcontType::Type1 => {
                self.allocated_rate = self.qos.fixed_bw;
                self.pir_si = self.qos.max_interval;
                self.pir_timer = self.qos.max_interval;
            },
            TcontType::Type2 => {
                self.allocated_rate = self.qos.assured_bw;
                self.pir_si = self.qos.max_interval;
                self.pir_timer = self.qos.max_interval;
            },
            TcontType::Type3 => {
                self.allocated_rate = self.qos.non_assured_bw;
                self.gir_timer = self.qos.max_interval;
                self.pir_si = self.qos.min_interval;
                self.pir_timer = self.qos.min_interval;
            },
            TcontType::Type4 => {
                self.allocated_rate = self.qos.best_effort_bw;
                self.gir_timer = self.qos.max_interval;
                self.pir_si = self.qos.min_interval;
                self.pir_timer = self.qos.min_interval;
            },
        }
    }

    /// Rate the active class of this T-CONT is entitled to. Unit: bps.
    pub fn allocated_rate(&self) -> u32 {
        self.allocated_rate
    }

    /// Allocation size for one service. Unit: word.
    pub fn allocation_words(&self) -> u32 {
        self.allocation_words
    }

    pub fn set_allocation_words(&mut self, words: u32) {
        self.allocation_words = words;
    }

    /// Service interval of this T-CONT. Unit: frame slot.
    pub fn service_interval(&self) -> u16 {
        self.pir_si
    }

    pub fn pir_timer(&self) -> u16 {
        self.pir_timer
    }

    pub fn gir_timer(&self) -> u16 {
        self.gir_timer
    }

    pub fn update_pir_timer(&mut self) {
        if self.pir_timer > 0 {
            self.pir_timer -= 1;
        }
    }

    pub fn update_gir_timer(&mut self) {
        if self.gir_timer > 0 {
            self.gir_timer -= 1;
        }
    }

    pub fn reset_pir_timer(&mut self) {
        self.pir_timer = self.pir_si;
    }

    pub fn reset_gir_timer(&mut self) {
        self.gir_timer = self.pir_si / 2;
    }

    pub fn variable_word(&self) -> i64 {
        self.variable_word
    }

    pub fn set_variable_word(&mut self, words: i64) {
        self.variable_word = words;
    }

    /// Time at which a DBRU was last solicited from this T-CONT.
    pub fn last_polling_time(&self) -> u64 {
        self.last_polling_time
    }

    /// Record a DBRU received at `time` and drop reports that fell out of
    /// the bookkeeping window.
    pub fn receive_status_report(&mut self, mut report: Dbru, time: u64) {
        report.receive_time = time;
        self.reports.push_back(report);

        if time > HISTORY_TO_MAINTAIN {
            let threshold = time - HISTORY_TO_MAINTAIN;
            while let Some(front) = self.reports.front() {
                if front.receive_time < threshold {
                    self.reports.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Most recent status report, if any report is still in the window.
    pub fn latest_report(&self) -> Option<&Dbru> {
        self.reports.back()
    }

    /// Record a grant produced at `time` and drop grants that fell out of
    /// the bookkeeping window. A grant that solicits a DBRU counts as a
    /// poll of this T-CONT.
    pub fn add_allocation_to_history(&mut self, mut allocation: BwAllocation, time: u64) {
        allocation.create_time = time;
        let polled = allocation.dbru_flag;
        self.allocations.push_back(allocation);

        if time > HISTORY_TO_MAINTAIN {
            let threshold = time - HISTORY_TO_MAINTAIN;
            while let Some(front) = self.allocations.front() {
                if front.create_time < threshold {
                    self.allocations.pop_front();
                } else {
                    break;
                }
            }
        }

        if polled {
            self.last_polling_time = time;
        }
    }

    /// Estimate the data still waiting at the ONU.
    ///
    /// Starts from the latest reported occupancy and subtracts every grant
    /// the ONU could not have seen when it generated that report, i.e.
    /// grants created less than one downstream trip before the report was
    /// received. A grant that carries a DBRU spends one word on the report
    /// itself.
    pub fn calculate_remaining_data_to_serve(&self, rtt: u64, slot_size: u64) -> u32 {
        let report = match self.reports.back() {
            Some(r) => r,
            None => return 0,
        };

        if self.allocations.is_empty() {
            return report.buf_occ();
        }

        let mut assigned: i64 = 0;
        for alloc in self.allocations.iter().rev() {
            if alloc.create_time + rtt + slot_size / 2 > report.receive_time {
                assigned += alloc.grant_size as i64;
                if alloc.dbru_flag {
                    assigned -= 1;
                }
            } else {
                break;
            }
        }

        let remaining = report.buf_occ() as i64 - assigned;
        if remaining < 0 {
            0
        } else {
            remaining as u32
        }
    }
}
