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

//! XGIANT allocation policy.
//!
//! Keeps GIANT's strict class order but replaces timer gating with an
//! every-cycle allocation and fair sharing of the frame among the best
//! effort class. Each T4 pass divides the unallocated frame words evenly
//! over the T4 T-CONTs still to come; a request beyond that share is
//! remembered as a deficit and replayed in the next cycle, bounded by a
//! burst cap.

use super::Bursts;
use super::CycleContext;
use super::DbaPolicy;
use crate::qos::allocation_words;
use crate::qos::TcontType;
use crate::tcont::TcontOltMap;
use crate::Config;

pub struct Xgiant {
    /// Traversal cursor into the T-CONT arena.
    cursor: usize,

    /// Whether the current cycle has visited every class.
    stop: bool,

    /// Per-class cursors, advancing in strides of 4.
    first_t1: usize,
    last_t1: usize,
    first_t2: usize,
    last_t2: usize,
    first_t3: usize,
    last_t3: usize,
    first_t4: usize,
    last_t4: usize,

    /// Whether this cycle is a first (guaranteed) round. Alternates
    /// every cycle; deficits recorded in a first round are replayed in
    /// the following second round.
    t3_first_round: bool,

    /// Unserved words each T4 T-CONT could not fit into its share,
    /// indexed by T-CONT group.
    t4_deficits: Vec<u32>,

    /// Share words T4 T-CONTs left unused in the current first round.
    extra_alloc: u32,

    /// Share of the T3 allocation granted in the guaranteed round.
    t3_gir_fraction: f64,

    /// Share of the T3 allocation granted in the peak round.
    t3_pir_fraction: f64,

    /// A replayed T4 request larger than this multiple of the fair
    /// share collapses back to one share.
    deficit_cap_multiplier: u32,

    /// Duration of one frame slot. Unit: nanosecond.
    frame_slot_ns: u64,
}

impl Xgiant {
    pub fn new(conf: &Config) -> Xgiant {
        Xgiant {
            cursor: 0,
            stop: false,
            first_t1: 0,
            last_t1: 0,
            first_t2: 1,
            last_t2: 1,
            first_t3: 2,
            last_t3: 2,
            first_t4: 3,
            last_t4: 3,
            t3_first_round: true,
            t4_deficits: Vec::new(),
            extra_alloc: 0,
            t3_gir_fraction: conf.xgiant_t3_gir_fraction,
            t3_pir_fraction: conf.xgiant_t3_pir_fraction,
            deficit_cap_multiplier: conf.xgiant_deficit_cap_multiplier,
            frame_slot_ns: conf.phy.frame_slot_ns as u64,
        }
    }

    /// Number of T4 T-CONTs the current T4 pass has not finished yet.
    fn remaining_t4_tconts(&self, total: usize) -> u32 {
        let remaining = if self.first_t4 <= self.last_t4 {
            (total - self.last_t4 + self.first_t4) / 4
        } else {
            (self.first_t4 - self.last_t4) / 4
        };
        remaining as u32
    }
}

impl DbaPolicy for Xgiant {
    fn on_tcont_added(&mut self, tconts: &mut TcontOltMap, index: usize) {
        let tcont = &mut tconts[index];
        tcont.set_allocation_words(allocation_words(
            tcont.allocated_rate(),
            tcont.service_interval(),
            self.frame_slot_ns,
        ));

        if tcont.tcont_type() == TcontType::Type4 {
            self.t4_deficits.push(0);
        }
    }

    fn first_tcont(&mut self, _tconts: &TcontOltMap) -> usize {
        self.stop = false;
        self.first_t1 = self.last_t1;
        self.cursor = self.last_t1;
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
        let total = tconts.len();
        let tcont = &mut tconts[index];
        let mut size2_assign;

        match tcont.tcont_type() {
            TcontType::Type1 => {
                // Fixed bandwidth, every cycle.
                size2_assign = tcont.allocation_words();
                tcont.reset_pir_timer();
            },
            TcontType::Type2 => {
                size2_assign = tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
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
            },
            TcontType::Type3 => {
                size2_assign = tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                let fraction = if self.t3_first_round {
                    self.t3_gir_fraction
                } else {
                    self.t3_pir_fraction
                };
                if size2_assign > 0 {
                    if size2_assign < 4 {
                        size2_assign = 4;
                    }
                    let cap = fraction * tcont.allocation_words() as f64;
                    if size2_assign as f64 > cap {
                        size2_assign = cap as u32;
                    }
                    if !bursts.is_tcont_served(tcont.alloc_id()) {
                        size2_assign += 1;
                    }
                } else if self.t3_first_round {
                    // The second round will poll if it grants nothing.
                    size2_assign = 0;
                } else {
                    size2_assign = 1;
                }
            },
            TcontType::Type4 => {
                size2_assign = tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);

                // Fair share of the unallocated frame over the T4
                // T-CONTs this pass still has to visit.
                let remaining_t4 = self.remaining_t4_tconts(total);
                let threshold = (ctx.phy.us_frame_words - ctx.allocated_words - 10
                    + self.extra_alloc)
                    / remaining_t4;
                let deficit_index = self.last_t4 / 4;

                if self.t3_first_round {
                    if size2_assign > 0 {
                        if size2_assign > threshold {
                            self.t4_deficits[deficit_index] = size2_assign - threshold;
                            size2_assign = threshold;
                        } else {
                            self.extra_alloc += threshold - size2_assign;
                        }

                        if size2_assign < 4 {
                            size2_assign = 4;
                        }
                        if !bursts.is_tcont_served(tcont.alloc_id()) {
                            size2_assign += 1;
                        }
                    } else {
                        size2_assign = 1;
                    }
                } else {
                    // Replay the deficit of the previous round, bounded
                    // so a bursty T-CONT cannot flood the frame.
                    size2_assign += self.t4_deficits[deficit_index];
                    if size2_assign > self.deficit_cap_multiplier * threshold {
                        size2_assign = threshold;
                    }

                    if size2_assign > 0 {
                        if size2_assign < 4 {
                            size2_assign = 4;
                        }
                        if !bursts.is_tcont_served(tcont.alloc_id()) {
                            size2_assign += 1;
                        }
                    } else {
                        size2_assign = 1;
                    }
                }
            },
        }

        let onu_id = tcont.onu_id();
        bursts.fit_to_frame(onu_id, size2_assign, ctx.allocated_words, &ctx.phy, &ctx.profile)
    }

    fn all_tconts_served(&mut self, tconts: &TcontOltMap) -> bool {
        let total = tconts.len();
        let tcont_type = tconts[self.cursor].tcont_type();

        match tcont_type {
            TcontType::Type1 => {
                self.last_t1 += 4;
                if self.last_t1 >= total {
                    self.last_t1 = 0;
                }
                self.cursor = self.last_t1;
            },
            TcontType::Type2 => {
                self.last_t2 += 4;
                if self.last_t2 > total {
                    self.last_t2 = 1;
                }
                self.cursor = self.last_t2;
            },
            TcontType::Type3 => {
                self.last_t3 += 4;
                if self.last_t3 > total {
                    self.last_t3 = 2;
                }
                self.cursor = self.last_t3;
            },
            TcontType::Type4 => {
                self.last_t4 += 4;
                if self.last_t4 > total {
                    self.last_t4 = 3;
                }
                self.cursor = self.last_t4;
            },
        }

        match tcont_type {
            TcontType::Type1 if self.first_t1 == self.last_t1 => {
                self.cursor = self.last_t2;
                self.first_t2 = self.last_t2;
            },
            TcontType::Type2 if self.first_t2 == self.last_t2 => {
                self.cursor = self.last_t3;
                self.first_t3 = self.last_t3;
            },
            TcontType::Type3 if self.first_t3 == self.last_t3 => {
                self.cursor = self.last_t4;
                self.first_t4 = self.last_t4;
                if self.t3_first_round {
                    // Deficits and spare shares restart with every
                    // first-round T4 pass.
                    self.extra_alloc = 0;
                    for deficit in self.t4_deficits.iter_mut() {
                        *deficit = 0;
                    }
                }
            },
            TcontType::Type4 if self.first_t4 == self.last_t4 => {
                self.stop = true;
                self.t3_first_round = !self.t3_first_round;
                self.last_t1 = 0;
                self.last_t2 = 1;
                self.last_t3 = 2;
                self.last_t4 += 4;
                if self.last_t4 > total {
                    self.last_t4 = 3;
                }
            },
            _ => {},
        }

        self.stop
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
        conf.set_dba_algorithm("xgiant")?;
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
    fn t1_fixed_grant_every_cycle() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        for _ in 0..4 {
            let map = tester.next_bwmap()?;
            assert_eq!(tester.grant_for(&map, 1024), Some(156));
        }
        Ok(())
    }

    #[test]
    fn t3_rounds_alternate_between_shares() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        // 100Mbps over the minimum interval is 390 words. The first
        // round caps at 20%, the second at 80%, each plus a report word.
        tester.report(1026, 10_000)?;
        let first = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&first, 1026), Some(78 + 1));

        tester.report(1026, 10_000)?;
        let second = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&second, 1026), Some(312 + 1));
        Ok(())
    }

    #[test]
    fn t4_deficit_is_replayed_next_cycle() -> Result<()> {
        let mut tester = tester()?;
        for onu in 0..4u16 {
            tester.add_onu(onu, 1024 + onu * 4, qos())?;
        }

        // One T4 asks for more than its quarter share of the frame.
        tester.report(1027, 3_000)?;
        let first = tester.next_bwmap()?;
        let g1 = tester.grant_for(&first, 1027).unwrap() as u32;
        assert!(g1 < 3_000, "first-round grant {} not capped", g1);

        // Second round: the unserved remainder rides on top of the
        // fresh request.
        tester.report(1027, 3_000)?;
        let second = tester.next_bwmap()?;
        let g2 = tester.grant_for(&second, 1027).unwrap() as u32;
        assert!(g2 > 3_000, "deficit not replayed, got {}", g2);
        Ok(())
    }

    #[test]
    fn oversized_deficit_collapses_to_one_share() -> Result<()> {
        let mut tester = tester()?;
        for onu in 0..4u16 {
            tester.add_onu(onu, 1024 + onu * 4, qos())?;
        }

        // A persistent 30000-word backlog leaves a deficit far beyond
        // the burst cap, so the replay falls back to a single share.
        tester.report(1027, 30_000)?;
        let first = tester.next_bwmap()?;
        let g1 = tester.grant_for(&first, 1027).unwrap() as u32;
        assert!(g1 < 5_000, "first-round grant {} beyond a quarter share", g1);

        // The class cursor rotated at the cycle end, so 1027 is now the
        // last T4 of the pass and its single share is everything the
        // frame has left, still far below the replayed deficit.
        tester.report(1027, 30_000)?;
        let second = tester.next_bwmap()?;
        let g2 = tester.grant_for(&second, 1027).unwrap() as u32;
        assert!(g2 > g1);
        assert!(g2 <= crate::Phy::default().us_frame_words);
        Ok(())
    }

    #[test]
    fn idle_t4_is_polled() -> Result<()> {
        let mut tester = tester()?;
        tester.add_onu(1, 1024, qos())?;

        let map = tester.next_bwmap()?;
        assert_eq!(tester.grant_for(&map, 1027), Some(1));
        Ok(())
    }
}
