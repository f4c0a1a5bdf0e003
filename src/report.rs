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

//! Grant and status report records exchanged between OLT and ONU.
//!
//! These are in-memory records; serialization to the XGTC wire format
//! belongs to the framing layer.

/// The buffer occupancy field of a DBRU is 24 bits wide.
const BUF_OCC_MASK: u32 = 0x00FF_FFFF;

/// Start time value marking a grant that continues the previous burst of
/// the same ONU, without a new preamble.
pub const BURST_CONTINUATION: u16 = 0xFFFF;

/// Dynamic Bandwidth Report Upstream: the buffer occupancy report an ONU
/// piggybacks on a granted burst.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dbru {
    /// Reported queue occupancy. Unit: word.
    buf_occ: u32,

    /// Time at which the ONU generated the report. Unit: nanosecond.
    pub create_time: u64,

    /// Time at which the OLT received the report. Unit: nanosecond.
    pub receive_time: u64,
}

impl Dbru {
    pub fn new(buf_occ: u32) -> Dbru {
        Dbru {
            buf_occ: buf_occ & BUF_OCC_MASK,
            create_time: 0,
            receive_time: 0,
        }
    }

    /// Reported queue occupancy. Unit: word.
    pub fn buf_occ(&self) -> u32 {
        self.buf_occ
    }
}

/// One bandwidth grant within a BW-MAP.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BwAllocation {
    /// Alloc-ID of the T-CONT this grant belongs to.
    pub alloc_id: u16,

    /// Whether the ONU must piggyback a DBRU in the granted window.
    pub dbru_flag: bool,

    /// Whether a PLOAM message is carried in the burst header.
    pub ploamu_flag: bool,

    /// Word offset of the burst within the upstream PHY frame.
    /// [`BURST_CONTINUATION`] means this grant extends the previous burst.
    pub start_time: u16,

    /// Granted size. Unit: word.
    pub grant_size: u16,

    /// Forced wakeup indication.
    pub fwi: bool,

    /// Index of the burst profile the ONU must use.
    pub burst_profile_index: u8,

    /// Time at which the OLT produced the grant. Unit: nanosecond.
    pub create_time: u64,

    /// Time at which the ONU received the grant. Unit: nanosecond.
    pub receive_time: u64,
}

impl BwAllocation {
    pub fn new(
        alloc_id: u16,
        dbru_flag: bool,
        ploamu_flag: bool,
        start_time: u16,
        grant_size: u16,
        burst_profile_index: u8,
    ) -> BwAllocation {
        BwAllocation {
            alloc_id,
            dbru_flag,
            ploamu_flag,
            start_time,
            grant_size,
            fwi: false,
            burst_profile_index,
            create_time: 0,
            receive_time: 0,
        }
    }
}

/// The ordered grant list broadcast downstream once per frame slot.
#[derive(Clone, Debug, Default)]
pub struct BwMap {
    /// Grants in transmission order.
    pub allocations: Vec<BwAllocation>,

    /// Time at which the map was produced. Unit: nanosecond.
    pub creation_time: u64,
}

impl BwMap {
    pub fn new() -> BwMap {
        BwMap::default()
    }

    /// Number of grants in the map.
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BwAllocation> {
        self.allocations.get(index)
    }
}

/// Physical layer profile used by an ONU's upstream bursts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BurstProfile {
    /// Preamble length. Unit: byte.
    pub preamble_bytes: u16,

    /// Delimiter length. Unit: byte.
    pub delimiter_bytes: u16,

    /// Whether upstream bursts are FEC coded.
    pub fec: bool,
}

impl Default for BurstProfile {
    fn default() -> BurstProfile {
        BurstProfile {
            preamble_bytes: 20,
            delimiter_bytes: 4,
            fec: true,
        }
    }
}
