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

//! GIANT allocation policy.
//!
//! Classes are visited strictly by priority: T1, then T2, then T3 and T4
//! in two rounds. In the first round T3 is served up to its guaranteed
//! share while T4 is only timer-reset; in the second round T3 tops up to
//! its peak share and T4 consumes what is left. Every class is gated by
//! a per-T-CONT service interval timer that reloads on service and ticks
//! down once per produced BW-MAP.

use super::Bursts;
use super::CycleContext;
use super::DbaPolicy;
use crate::qos::allocation_words;
use crate::qos::TcontType;
use crate::tcont::TcontOltMap;
use crate::tcont::TIMER_EXPIRE_VALUE;
use crate::Config;

pub struct Giant {
    /// Traversal cursor into the T-CONT arena.
    cursor: usize,

    /// Whether the current cycle has visited every class.
    stop: bool,

    /// Per-class cursors. Each class advances in strides of 4 through
    /// the arena and wraps back to its stride offset.
    first_t1: usize,
    last_t1: usize,
    first_t2: usize,
    last_t2: usize,
    first_t3: usize,
    last_t3: usize,
    first_t4: usize,
    last_t4: usize,

    /// Whether T3 is in its guaranteed round. Toggles when the T4 pass
    /// of the first round completes.
    t3_first_round: bool,

    /// Share of the T3 allocation granted in the guaranteed round.
    t3_gir_fraction: f64,

    /// Share of the T3 allocation granted in the peak round.
    t3_pir_fraction: f64,

    /// Duration of one frame slot. Unit: nanosecond.
    frame_slot_ns: u64,
}

impl Giant {
    pub fn new(conf: &Config) -> Giant {
        Giant {
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
            t3_gir_fraction: conf.giant_t3_gir_fraction,
            t3_pir_fraction: conf.giant_t3_pir_fraction,
            frame_slot_ns: conf.phy.frame_slot_ns as u64,
        }
    }
}

impl DbaPolicy for Giant {
    fn on_tcont_added(&mut self, tconts: &mut TcontOltMap, index: usize) {
        let tcont = &mut tconts[index];
        tcont.set_allocation_words(allocation_words(
            tcont.allocated_rate(),
            tcont.service_interval(),
            self.frame_slot_ns,
        ));
    }

    fn first_tcont(&mut self, _tconts: &TcontOltMap) -> usize {
        // Every cycle starts from the T1 class.
        self.stop = false;
        self.first_t1 = self.last_t1;
        self.cursor = self.last_t1;
        self.cursor
    }

    fn next_tcont(&mut self, _tconts: &TcontOltMap) -> usize {
        // The cursor was already moved when the previous T-CONT was
        // checked off.
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
        let mut size2_assign = tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);

        match tcont.tcont_type() {
            TcontType::Type1 => {
                // Fixed bandwidth is granted unconditionally on expiry.
                if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                    size2_assign = tcont.allocation_words();
                    tcont.reset_pir_timer();
                }
            },
            TcontType::Type2 => {
                if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                    size2_assign =
                        tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                    if size2_assign > 0 {
                        if size2_assign < 4 {
                            // Smallest allocation for receiving data.
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
                        // Nothing to send; poll for the queue status.
                        size2_assign = 1;
                    }
                    tcont.reset_pir_timer();
                }
            },
            TcontType::Type3 => {
                if self.t3_first_round {
                    if tcont.gir_timer() == TIMER_EXPIRE_VALUE {
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
                            // No poll in the first round; the second
                            // round will poll if it grants nothing.
                            size2_assign = 0;
                        }
                        tcont.reset_gir_timer();
                    }
                } else if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
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
                    tcont.reset_pir_timer();
                }
            },
            TcontType::Type4 => {
                if self.t3_first_round {
                    // Best effort waits for the second round.
                    if tcont.gir_timer() == TIMER_EXPIRE_VALUE {
                        size2_assign = 0;
                        tcont.reset_gir_timer();
                    }
                } else if tcont.pir_timer() == TIMER_EXPIRE_VALUE {
                    size2_assign =
                        tcont.calculate_remaining_data_to_serve(ctx.rtt, ctx.frame_slot_ns);
                    if size2_assign > 0 {
                        if size2_assign < 4 {
                            size2_assign = 4;
                        }
                        if !bursts.is_tcont_served(tcont.alloc_id()) {
                            size2_assign += 1;
                        }
                        if size2_assign > tcont.allocation_words() {
                            size2_assign = tcont.allocation_words();
                        }
                    } else {
                        size2_assign = 1;
                    }
                    tcont.reset_pir_timer();
                }
            },
        }

        let onu_id = tcont.onu_id();
        bursts.fit_to_frame(onu_id, size2_assign, ctx.allocated_words, &ctx.phy, &ctx.profile)
    }

    fn all_tconts_served(&mut self, tconts: &TcontOltMap) -> bool {
        let len = tconts.len();
        let tcont_type = tconts[self.cursor].tcont_type();

        match tcont_type {
            TcontType::Type1 => {
                self.last_t1 += 4;
                if self.last_t1 >= len {
                    self.last_t1 = 0;
                }
                self.cursor = self.last_t1;
            },
            TcontType::Type2 => {
                self.last_t2 += 4;
                if self.last_t2 >= len {
                    self.last_t2 = 1;
                }
                self.cursor = self.last_t2;
            },
            TcontType::Type3 => {
                self.last_t3 += 4;
                if self.last_t3 >= len {
                    self.last_t3 = 2;
                }
                self.cursor = self.last_t3;
            },
            TcontType::Type4 => {
                self.last_t4 += 4;
                if self.last_t4 >= len {
                    self.last_t4 = 3;
                }
                self.cursor = self.last_t4;
            },
        }

        // Class boundaries: when a class wraps back to where its pass
        // started, fall through to the next class, or close the cycle.
        match tcont_type {
            TcontType::Type1 if self.first_t1 == self.last_t1 => {
                self.cursor = self.last_t2;
                self.first_t2 = self.last_t2;
            },
            TcontType::Type2 if self.first_t2 == self.last_t2 => {
                self.cursor = self.last_t3;
                self.first_t3 = self.last_t3;
                self.t3_first_round = true;
            },
            TcontType::Type3 if self.first_t3 == self.last_t3 => {
                self.cursor = self.last_t4;
                self.first_t4 = self.last_t4;
            },
            TcontType::Type4 if self.first_t4 == self.last_t4 => {
                if self.t3_first_round {
                    // First round done; revisit T3 up to its peak share.
                    self.t3_first_round = false;
                    self.cursor = self.last_t3;
                    self.first_t3 = self.last_t3;
                } else {
                    self.stop = true;
                    self.t3_first_round = true;
                    self.last_t1 = 0;
                    self.last_t2 = 1;
                    self.last_t3 = 2;
                    self.last_t4 = 3;
                }
            },
            _ => {},
        }

        self.stop
    }

    fn finalize_bwmap_production(&mut self, tconts: &mut TcontOltMap) {
        for (_, tcont) in tconts.iter_mut() {
            if tcont.pir_timer() > TIMER_EXPIRE_VALUE {
                tcont.update_pir_timer();
            }
            if matches!(tcont.tcont_type(), TcontType::Type3 | TcontType::Type4)
                && tcont.gir_timer() > TIMER_EXPIRE_VALUE
            {
                tcont.update_gir_timer();
            }
        }
    }
}
