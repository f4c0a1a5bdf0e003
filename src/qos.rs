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

//! Traffic classes and per-circuit QoS parameters.

/// The four T-CONT traffic classes of XG-PON.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TcontType {
    /// T-CONT 1, fixed bandwidth.
    Type1 = 1,

    /// T-CONT 2, assured bandwidth.
    Type2 = 2,

    /// T-CONT 3, assured plus non-assured bandwidth.
    Type3 = 3,

    /// T-CONT 4, best effort.
    Type4 = 4,
}

impl TcontType {
    /// Position of this class within one stride-4 T-CONT group.
    pub fn stride_index(self) -> usize {
        self as usize - 1
    }
}

/// Bandwidth and service interval configuration of one T-CONT.
///
/// Rates are in bits per second. Intervals are in multiples of the
/// downstream frame slot (125us in the reference configuration).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QosParameters {
    /// Fixed bandwidth, served unconditionally (T1).
    pub fixed_bw: u32,

    /// Assured bandwidth (T2).
    pub assured_bw: u32,

    /// Non-assured bandwidth (T3).
    pub non_assured_bw: u32,

    /// Best effort bandwidth (T4).
    pub best_effort_bw: u32,

    /// Minimum service interval. Unit: frame slot.
    pub min_interval: u16,

    /// Maximum service interval. Unit: frame slot.
    pub max_interval: u16,
}

/// Convert a rate and service interval into an allocation size in words.
///
/// The raw bit budget of one service interval is rounded down to a 32-bit
/// boundary, never up, so the configured rate is an upper bound.
pub fn allocation_words(rate_bps: u32, service_interval: u16, slot_ns: u64) -> u32 {
    let mut bits = (rate_bps as u64) * slot_ns;
    bits *= service_interval as u64;
    bits /= 1_000_000_000;
    if bits % 32 != 0 {
        bits = (bits / 32) * 32;
    }
    (bits / 32) as u32
}
