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

//! ONU-side T-CONT bookkeeping.

use std::collections::VecDeque;

use super::HISTORY_TO_MAINTAIN;
use crate::qos::QosParameters;
use crate::qos::TcontType;
use crate::report::BwAllocation;
use crate::report::Dbru;

/// Upstream side of one XGEM connection multiplexed into a T-CONT.
#[derive(Clone, Debug, Default)]
pub struct ConnectionSender {
    xgem_port: u16,

    /// Data queued for upstream transmission. Unit: word.
    queue_words: u32,

    /// Remainder of an SDU whose segmentation is in progress. Unit: word.
    frag_words: u32,
}

impl ConnectionSender {
    pub fn new(xgem_port: u16) -> ConnectionSender {
        ConnectionSender {
            xgem_port,
            queue_words: 0,
            frag_words: 0,
        }
    }

    pub fn xgem_port(&self) -> u16 {
        self.xgem_port
    }

    /// Queued data visible to the scheduler. Unit: word.
    pub fn buf_occupancy(&self) -> u32 {
        self.queue_words
    }

    pub fn set_buf_occupancy(&mut self, words: u32) {
        self.queue_words = words;
    }

    /// Remainder of the SDU under segmentation. Unit: word.
    pub fn frag_buf_occupancy(&self) -> u32 {
        self.frag_words
    }

    pub fn set_frag_buf_occupancy(&mut self, words: u32) {
        self.frag_words = words;
    }

    /// Whether an SDU of this connection is partially sent. The scheduler
    /// must finish it before serving any other connection.
    pub fn is_segmentation_running(&self) -> bool {
        self.frag_words > 0
    }
}

/// One T-CONT as tracked by an ONU.
pub struct TcontOnu {
    alloc_id: u16,
    tcont_type: TcontType,
    qos: QosParameters,

    /// Connections multiplexed into this T-CONT, in provisioning order.
    connections: Vec<ConnectionSender>,

    /// Reports sent upstream, oldest first.
    reports: VecDeque<Dbru>,

    /// Grants received from the OLT, oldest first.
    allocations: VecDeque<BwAllocation>,
}

impl TcontOnu {
    pub fn new(alloc_id: u16, tcont_type: TcontType, qos: QosParameters) -> TcontOnu {
        TcontOnu {
            alloc_id,
            tcont_type,
            qos,
            connections: Vec::new(),
            reports: VecDeque::new(),
            allocations: VecDeque::new(),
        }
    }

    pub fn alloc_id(&self) -> u16 {
        self.alloc_id
    }

    pub fn tcont_type(&self) -> TcontType {
        self.tcont_type
    }

    pub fn qos(&self) -> &QosParameters {
        &self.qos
    }

    pub fn add_connection(&mut self, conn: ConnectionSender) {
        self.connections.push(conn);
    }

    pub fn conn_number(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, index: usize) -> Option<&ConnectionSender> {
        self.connections.get(index)
    }

    pub fn connection_mut(&mut self, index: usize) -> Option<&mut ConnectionSender> {
        self.connections.get_mut(index)
    }

    /// Sum the queue occupancies of all connections into a DBRU, record it
    /// in the report history and return it for piggybacking.
    pub fn prepare_buf_occupancy_report(&mut self, now: u64) -> Dbru {
        let total: u32 = self.connections.iter().map(|c| c.buf_occupancy()).sum();

        let mut report = Dbru::new(total);
        report.create_time = now;
        self.reports.push_back(report);

        if now > HISTORY_TO_MAINTAIN {
            let threshold = now - HISTORY_TO_MAINTAIN;
            while let Some(front) = self.reports.front() {
                if front.create_time < threshold {
                    self.reports.pop_front();
                } else {
                    break;
                }
            }
        }

        report
    }

    /// Record a grant received at `now` and drop grants that fell out of
    /// the bookkeeping window.
    pub fn receive_bw_allocation(&mut self, mut allocation: BwAllocation, now: u64) {
        allocation.receive_time = now;
        self.allocations.push_back(allocation);

        if now > HISTORY_TO_MAINTAIN {
            let threshold = now - HISTORY_TO_MAINTAIN;
            while let Some(front) = self.allocations.front() {
                if front.receive_time < threshold {
                    self.allocations.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Most recent grant received from the OLT.
    pub fn latest_allocation(&self) -> Option<&BwAllocation> {
        self.allocations.back()
    }
}
