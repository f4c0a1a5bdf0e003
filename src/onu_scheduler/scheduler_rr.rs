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

//! Round-robin scheduling over the connections of a T-CONT.

use super::OnuUsScheduler;
use crate::tcont::TcontOnu;
use crate::Config;

pub struct SchedulerRoundRobin {
    /// Index of the connection served most recently.
    last_served_index: usize,

    /// Largest amount one connection may upload in one service.
    /// Unit: byte.
    max_service_size: u32,
}

impl SchedulerRoundRobin {
    pub fn new(conf: &Config) -> SchedulerRoundRobin {
        SchedulerRoundRobin {
            last_served_index: 0,
            max_service_size: conf.onu_max_service_size,
        }
    }
}

impl OnuUsScheduler for SchedulerRoundRobin {
    fn select_conn_to_serve(&mut self, tcont: &TcontOnu) -> Option<(usize, u32)> {
        let num = tcont.conn_number();
        debug_assert!(num > 0);
        debug_assert!(self.last_served_index < num);

        // A half-sent SDU blocks the T-CONT until its remainder is out.
        let last_conn = tcont.connection(self.last_served_index)?;
        if last_conn.is_segmentation_running() {
            return Some((self.last_served_index, last_conn.frag_buf_occupancy() * 4));
        }

        self.last_served_index += 1;
        if self.last_served_index >= num {
            self.last_served_index = 0;
        }
        let org_served_index = self.last_served_index;

        loop {
            if let Some(conn) = tcont.connection(self.last_served_index) {
                let data_in_queue = conn.buf_occupancy() * 4;
                if data_in_queue > 0 {
                    let amount = data_in_queue.min(self.max_service_size);
                    return Some((self.last_served_index, amount));
                }
            }
            self.last_served_index += 1;
            if self.last_served_index >= num {
                self.last_served_index = 0;
            }
            if self.last_served_index == org_served_index {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::QosParameters;
    use crate::qos::TcontType;
    use crate::tcont::ConnectionSender;

    fn scheduler() -> SchedulerRoundRobin {
        SchedulerRoundRobin::new(&Config::new().unwrap())
    }

    fn tcont(queues: &[u32]) -> TcontOnu {
        let mut t = TcontOnu::new(1024, TcontType::Type4, QosParameters::default());
        for (i, words) in queues.iter().enumerate() {
            let mut conn = ConnectionSender::new(5000 + i as u16);
            conn.set_buf_occupancy(*words);
            t.add_connection(conn);
        }
        t
    }

    #[test]
    fn all_queues_empty_selects_nothing() {
        let mut sched = scheduler();
        let t = tcont(&[0, 0, 0]);
        assert_eq!(sched.select_conn_to_serve(&t), None);
    }

    #[test]
    fn connections_take_turns() {
        let mut sched = scheduler();
        let t = tcont(&[100, 200, 300]);

        assert_eq!(sched.select_conn_to_serve(&t), Some((1, 800)));
        assert_eq!(sched.select_conn_to_serve(&t), Some((2, 1200)));
        assert_eq!(sched.select_conn_to_serve(&t), Some((0, 400)));
        assert_eq!(sched.select_conn_to_serve(&t), Some((1, 800)));
    }

    #[test]
    fn empty_queues_are_skipped() {
        let mut sched = scheduler();
        let t = tcont(&[0, 0, 50]);

        assert_eq!(sched.select_conn_to_serve(&t), Some((2, 200)));
        assert_eq!(sched.select_conn_to_serve(&t), Some((2, 200)));
    }

    #[test]
    fn service_is_capped() {
        let mut sched = scheduler();
        // 20000 words is 80000 bytes, twice the per-service maximum.
        let t = tcont(&[20_000]);
        assert_eq!(sched.select_conn_to_serve(&t), Some((0, 40_000)));
    }

    #[test]
    fn running_segmentation_takes_priority() {
        let mut sched = scheduler();
        let mut t = tcont(&[100, 200]);

        // Serve connection 1 once, then leave a fragment on it.
        assert_eq!(sched.select_conn_to_serve(&t), Some((1, 800)));
        if let Some(conn) = t.connection_mut(1) {
            conn.set_frag_buf_occupancy(25);
        }

        // The fragment preempts the rotation, other backlog included.
        assert_eq!(sched.select_conn_to_serve(&t), Some((1, 100)));

        if let Some(conn) = t.connection_mut(1) {
            conn.set_frag_buf_occupancy(0);
        }
        assert_eq!(sched.select_conn_to_serve(&t), Some((0, 400)));
    }
}
