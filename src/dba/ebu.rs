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

//! Excess bandwidth utilization (EBU) policy.
//!
//! Extends the class-ordered traversal with per-T-CONT virtual word
//! counters and per-class excess pools. Every grant draws the T-CONT's
//! counter down; a T-CONT whose counter went negative is not served
//! until its service timer expires and the counter is replenished from
//! its entitlement. Entitlement a T-CONT leaves unused flows into its
//! class pool and pays off the debt of overdrawn siblings, so unused
//! bandwidth of one ONU becomes usable excess for another.

use super::Bursts;
use super::CycleContext;
use super::DbaPolicy;
use crate::qos::allocation_words;
use crate::qos::TcontType;
use crate::tcont::TcontOltMap;
use crate::tcont::TIMER_EXPIRE_VALUE;
use crate::Config;

pub struct Ebu {
    /// Traversal cursor into the T-CONT arena.
    cursor: usize,

    /// Whether the current cycle has visited every class.
    stop: bool,

    /// Whether the class has had its first T-CONT of this cycle marked.
    t1_served: bool,
    t2_served: bool,
    t3_served: bool,
    t4_served: bool,

    /// First and most recently visited index per class. The last index
    /// starts at a sentinel so a class pass never ends before it began.
    first_t1: usize,
    last_t1: usize,
    first_t2: usize,
    last_t2: usize,
    first_t3: usize,
    last_t3: usize,
    first_t4: usize,
    last_t4: usize,

    /// Index the next allocation cycle starts from.
    next_cycle_index: usize,

    /// Whether the T3/T4 traversal is in its guaranteed round.
    t3_first_round: bool,

    /// Smallest service interval in the system. Entitlements replenish
    /// once per this many frame slots. Unit: frame slot.
    minimum_si: u16,

    /// Frame slots left until the excess pools are flushed.
    alloc_cycle_count: u16,

    /// Per-class excess pools. Unit: word.
    pool_t2: i64,
    pool_t3: i64,
    pool_t4: i64,

    /// Share of the T3 entitlement available in the guaranteed round.
    t3_gir_fraction: f64,

    /// Share of the T3 entitlement available in the peak round.
    t3_pir_fraction: f64,

    /// Share of the T4 entitlement replenished per service interval.
    t4_fraction: f64,

    /// Duration of one frame slot. Unit: nanosecond.
    frame_slot_ns: u64,
}

impl Ebu {
    pub fn new(conf: &Config) -> Ebu {
        Ebu {
            cursor: 0,
            stop: false,
            t1_served: false,
            t2_served: false,
            t3_served: false,
            t4_served: false,
            first_t1: 0,
            last_t1: usize::MAX,
            first_t2: 0,
            last_t2: usize::MAX,
            first_t3: 0,
            last_t3: usize::MAX,
            first_t4: 0,
            last_t4: usize::MAX,
            next_cycle_index: 0,
            t3_first_round: true,
            minimum_si: conf.ebu_minimum_si,
            alloc_cycle_count: conf.ebu_minimum_si,
            pool_t2: 0,
            pool_t3: 0,
            pool_t4: 0,
            t3_gir_fraction: conf.ebu_t3_gir_fraction,
            t3_pir_fraction: conf.ebu_t3_pir_fraction,
            t4_fraction: conf.ebu_t4_fraction,
            frame_slot_ns: conf.phy.frame_slot_ns as u64,
        }
    }

    /// Record the cursor as the first or latest index its class visited
    /// in this cycle.
    fn mark_visited(&mut self, tcont_type: TcontType, index: usize) {
        match tcont_type {
            TcontType::Type1 => {
                if self.t1_served {
                    self.last_t1 = index;
                } else {
                    self.first_t1 = index;
                    self.t1_served = true;
                }
            },
            TcontType::Type2 => {
                if self.t2_served {
                    self.last_t2 = index;
                } else {
                    self.first_t2 = index;
                    self.t2_served = true;
                }
            },
            TcontType::Type3 => {
                if self.t3_served {
                    self.last_t3 = index;
                } else {
                    self.first_t3 = index;
                    self.t3_served = true;
                }
            },
            TcontType::Type4 => {
                if self.t4_served {
                    self.last_t4 = index;
                } else {
                    self.first_t4 = index;
                    self.t4_served = true;
                }
            },
        }
    }
}

impl DbaPolicy for Ebu {
    fn on_tcont_added(&mut self, tconts: &mut TcontOltMap, index: usize) {
        let tcont = &mut tconts[index];
        tcont.set_allocation_words(allocation_words(
            tcont.allocated_rate(),
            tcont.service_interval(),
            self.frame_slot_ns,
        ));
        // The virtual word counter starts at one full entitlement.
        tcont.set_variable_word(tcont.allocation_words() as i64);
    }

    fn first_tcont(&mut self, tconts: &TcontOltMap) -> usize {
        self.stop = false;
        self.cursor = self.next_cycle_index;
        self.mark_visited(tconts[self.cursor].tcont_type(), self.cursor);
        self.cursor
    }

    fn next_tcont(&mut self, _tconts: &TcontOltMap) -> usize {
        self.cursor
    }

    fn amount_to_upload(
        &mut self,
        tconts: &mut TcontOltMap,
        index: usize,
        bursts: &mut Bursts,
        ctx: &CycleContext,
    ) -> u32 {
        let tcont = &mut tconts[index];
        let variable_word = tcont.variable_word();
        let mut size2_assign: u32 = 0;

        match tcont.tcont_type() {
            TcontType::Type1 => {
                if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                    size2_assign = tcont.allocation_words();
                    tcont.reset_pir_timer();
                } else {
                    tcont.update_pir_timer();
                }
            },
            TcontType::Type2 => {
                if variable_word >= 0 {
                    size2_assign =
                        tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                    if size2_assign > 0 {
                        if size2_assign < 4 {
                            size2_assign = 4;
                        }
                        if size2_assign > tcont.allocation_words() {
                            size2_assign = tcont.allocation_words();
                        }
                        if !bursts.is_tcont_served(tcont.alloc_id()) {
                            // One word for the queue status report.
                            size2_assign += 1;
                        }
                    } else {
                        size2_assign = 1;
                    }
                    tcont.set_variable_word(variable_word - size2_assign as i64);
                }
            },
            TcontType::Type3 => {
                if self.t3_first_round {
                    if variable_word >= 0 {
                        size2_assign =
                            tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                        if size2_assign > 0 {
                            if size2_assign < 4 {
                                size2_assign = 4;
                            }
                            let cap = self.t3_gir_fraction * tcont.allocation_words() as f64;
                            if size2_assign as f64 > cap {
                                size2_assign = cap as u32;
                            }
                            if !bursts.is_tcont_served(tcont.alloc_id()) {
                                size2_assign += 1;
                            }
                        } else {
                            // The peak round polls this T-CONT if it
                            // still has nothing to send.
                            size2_assign = 0;
                        }
                        tcont.set_variable_word(variable_word - size2_assign as i64);
                    }
                } else if variable_word >= 0 {
                    size2_assign =
                        tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                    if size2_assign > 0 {
                        if size2_assign < 4 {
                            size2_assign = 4;
                        }
                        let cap = self.t3_pir_fraction * tcont.allocation_words() as f64;
                        if size2_assign as f64 > cap {
                            size2_assign = cap as u32;
                        }
                        if !bursts.is_tcont_served(tcont.alloc_id()) {
                            size2_assign += 1;
                        }
                    } else {
                        size2_assign = 1;
                    }
                    tcont.set_variable_word(variable_word - size2_assign as i64);
                }
            },
            TcontType::Type4 => {
                if self.t3_first_round {
                    // Best effort waits for the peak round.
                    size2_assign = 0;
                } else if variable_word >= 0 {
                    size2_assign =
                        tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                    if size2_assign > 0 {
                        if size2_assign < 4 {
                            size2_assign = 4;
                        }
                        if size2_assign > tcont.allocation_words() {
                            size2_assign = tcont.allocation_words();
                        }
                        if !bursts.is_tcont_served(tcont.alloc_id()) {
                            size2_assign += 1;
                        }
                    } else {
                        size2_assign = 1;
                    }
                    tcont.set_variable_word(variable_word - size2_assign as i64);
                }
            },
        }

        let onu_id = tcont.onu_id();
        bursts.fit_to_frame(onu_id, size2_assign, ctx.allocated_words, &ctx.phy, &ctx.profile)
    }

    fn all_tconts_served(&mut self, tconts: &TcontOltMap) -> bool {
        let total = tconts.len();
        let tcont_type = tconts[self.cursor].tcont_type();

        // Advance to the next T-CONT of the same class.
        loop {
            self.cursor += 1;
            if self.cursor == total {
                self.cursor = 0;
            }
            if tconts[self.cursor].tcont_type() == tcont_type {
                break;
            }
        }
        self.mark_visited(tcont_type, self.cursor);

        match tcont_type {
            TcontType::Type1 if self.first_t1 == self.last_t1 => {
                self.t1_served = false;
                self.cursor = self.next_cycle_index + 1;
                debug_assert_eq!(tconts[self.cursor].tcont_type(), TcontType::Type2);
                self.first_t2 = self.cursor;
                self.t2_served = true;
            },
            TcontType::Type2 if self.first_t2 == self.last_t2 => {
                self.t2_served = false;
                self.cursor = self.next_cycle_index + 2;
                debug_assert_eq!(tconts[self.cursor].tcont_type(), TcontType::Type3);
                self.first_t3 = self.cursor;
                self.t3_served = true;
                self.t3_first_round = true;
            },
            TcontType::Type3 if self.first_t3 == self.last_t3 => {
                self.t3_served = false;
                self.cursor = self.next_cycle_index + 3;
                debug_assert_eq!(tconts[self.cursor].tcont_type(), TcontType::Type4);
                self.first_t4 = self.cursor;
                self.t4_served = true;
            },
            TcontType::Type4 if self.first_t4 == self.last_t4 => {
                self.t4_served = false;
                if self.t3_first_round {
                    self.t3_first_round = false;
                    self.cursor = self.next_cycle_index + 2;
                    debug_assert_eq!(tconts[self.cursor].tcont_type(), TcontType::Type3);
                    self.first_t3 = self.cursor;
                    self.t3_served = true;
                } else {
                    self.stop = true;
                    self.t3_first_round = true;
                    self.cursor = 0;
                    self.next_cycle_index = 0;
                }
            },
            _ => {},
        }

        self.stop
    }

    fn finalize_bwmap_production(&mut self, tconts: &mut TcontOltMap) {
        self.alloc_cycle_count -= 1;

        for index in 0..tconts.len() {
            let tcont = &mut tconts[index];
            let tcont_type = tcont.tcont_type();
            if tcont_type == TcontType::Type1 {
                continue;
            }

            let mut pool = match tcont_type {
                TcontType::Type2 => self.pool_t2,
                TcontType::Type3 => self.pool_t3,
                _ => self.pool_t4,
            };

            // Pay off an overdrawn counter from the class pool.
            let variable_word = tcont.variable_word();
            if variable_word < 0 && pool > 0 {
                if pool + variable_word >= 0 {
                    tcont.set_variable_word(0);
                } else {
                    tcont.set_variable_word(pool + variable_word);
                }
            }

            match tcont_type {
                TcontType::Type2 => {
                    if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                        let variable_word = tcont.variable_word();
                        if variable_word >= 0 {
                            pool += variable_word;
                            tcont.set_variable_word(tcont.allocation_words() as i64);
                        } else {
                            tcont
                                .set_variable_word(tcont.allocation_words() as i64 + variable_word);
                        }
                        tcont.reset_pir_timer();
                    } else {
                        tcont.update_pir_timer();
                    }
                },
                TcontType::Type3 => {
                    if tcont.gir_timer() == TIMER_EXPIRE_VALUE {
                        let variable_word = tcont.variable_word();
                        if variable_word >= 0 {
                            pool = (pool as f64 + self.t3_gir_fraction * variable_word as f64)
                                as i64;
                            tcont.set_variable_word(
                                (self.t3_gir_fraction * tcont.allocation_words() as f64) as i64,
                            );
                        } else {
                            tcont.set_variable_word(
                                (self.t3_gir_fraction
                                    * (tcont.allocation_words() as i64 + variable_word) as f64)
                                    as i64,
                            );
                        }
                        tcont.reset_gir_timer();
                    } else {
                        tcont.update_gir_timer();
                    }

                    if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                        let variable_word = tcont.variable_word();
                        if variable_word >= 0 {
                            pool = (pool as f64 + self.t3_pir_fraction * variable_word as f64)
                                as i64;
                            tcont.set_variable_word(
                                (self.t3_pir_fraction * tcont.allocation_words() as f64) as i64,
                            );
                        } else {
                            tcont.set_variable_word(
                                (self.t3_pir_fraction
                                    * (tcont.allocation_words() as i64 + variable_word) as f64)
                                    as i64,
                            );
                        }
                        tcont.reset_pir_timer();
                    } else {
                        tcont.update_pir_timer();
                    }
                },
                _ => {
                    if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                        let variable_word = tcont.variable_word();
                        if variable_word >= 0 {
                            pool =
                                (pool as f64 + self.t4_fraction * variable_word as f64) as i64;
                            tcont.set_variable_word(
                                (self.t4_fraction * tcont.allocation_words() as f64) as i64,
                            );
                        } else {
                            tcont.set_variable_word(
                                (self.t4_fraction
                                    * (tcont.allocation_words() as i64 + variable_word) as f64)
                                    as i64,
                            );
                        }
                        tcont.reset_pir_timer();
                    } else {
                        tcont.update_pir_timer();
                    }
                },
            }

            match tcont_type {
                TcontType::Type2 => self.pool_t2 = pool,
                TcontType::Type3 => self.pool_t3 = pool,
                _ => self.pool_t4 = pool,
            }
        }

        if self.alloc_cycle_count == 0 {
            // A new allocation cycle: flush the pools and restart the
            // traversal at an ONU boundary.
            self.alloc_cycle_count = self.minimum_si;
            self.pool_t2 = 0;
            self.pool_t3 = 0;
            self.pool_t4 = 0;
            self.next_cycle_index = (self.cursor / 4) * 4;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dba::tests::*;
    use crate::qos::QosParameters;
    use crate::Result;
    use std::time::Duration;

    fn tester() -> Result<DbaTester> {
        let mut conf = crate::Config::new()?;
        conf.set_dba_algorithm("ebu")?;
        conf.set_logic_rtt(Duration::ZERO);
        Ok(DbaTester::with_config(&conf))
    }

    fn qos() -> QosParameters {
        QosParameters {
            fixed_bw: 10_000_000,
            assured_bw: 10_000_000,
            non_assured_bw: 100_000_000,
            best_effort_bw: 100_000_000,
            min_interval: 1,
            max_interval: 4,
        }
    }

    #[test]
    fn t1_grant_follows_the_service_timer() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        // The timer starts loaded, so the first grant comes only after
        // it has run down, then once per interval.
        let mut granted = Vec::new();
        for i in 0..10 {
            let map = tester.next_bwmap()?;
            if tester.grant_for(&map, 1024) == Some(156) {
                granted.push(i);
            }
        }
        assert_eq!(granted, vec![4, 9]);
        Ok(())
    }

    #[test]
    fn idle_tconts_are_polled_except_t1() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1024), None);
        assert_eq!(tester.grant_for(&map, 1025), Some(1));
        assert_eq!(tester.grant_for(&map, 1026), Some(1));
        assert_eq!(tester.grant_for(&map, 1027), Some(1));
        Ok(())
    }

    #[test]
    fn overdrawn_t2_is_blocked_until_replenished() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        // Entitlement is 156 words; each service takes 101 words, so the
        // counter goes negative after two and service stops.
        tester.report(1025, 100)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1025), Some(101));

        tester.report(1025, 100)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1025), Some(101));

        for _ in 0..3 {
            tester.report(1025, 100)?;
            let map = tester.next_bwmap()?;
            assert_eq!(tester.grant_for(&map, 1025), None);
        }

        // The service timer expired in the previous cycle and the
        // counter was replenished.
        tester.report(1025, 100)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1025), Some(101));
        Ok(())
    }

    #[test]
    fn t3_counter_limits_the_second_round() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        // Full counter: both rounds grant, 20% plus 60% of the 390-word
        // entitlement plus one report word.
        tester.report(1026, 10_000)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1026), Some(79 + 234));

        // The counter is down to 77 words; the guaranteed round drives
        // it negative and the peak round is skipped.
        tester.report(1026, 10_000)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1026), Some(79));

        // Replenished at the peak timer expiry.
        tester.report(1026, 10_000)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1026), Some(79 + 234));
        Ok(())
    }

    #[test]
    fn t4_is_served_in_the_peak_round_only() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        // One full entitlement plus the report word overdraws the
        // counter by one word.
        tester.report(1027, 3_000)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1027), Some(391));

        tester.report(1027, 3_000)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1027), None);

        // Half of the entitlement comes back at the timer expiry.
        tester.report(1027, 3_000)?;
        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1027), Some(391));
        Ok(())
    }
}
