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

//! Read-only physical layer descriptor consumed by the allocation core.

/// XG-PON1 upstream line rate. Unit: byte per second (around 2.5Gbps).
pub const XGPON1_US_LINE_RATE: u32 = 311_040_000;

/// XG-PON1 downstream frame slot duration. Unit: nanosecond.
pub const XGPON1_DS_FRAME_SLOT_SIZE: u32 = 125_000;

/// XG-PON1 minimum guard time between two upstream bursts. Unit: word.
pub const XGPON1_MINIMUM_GUARD_TIME: u32 = 2;

/// XG-PON1 FEC code block size. Unit: byte.
pub const XGPON1_FEC_BLOCK_SIZE: u32 = 248;

/// XG-PON1 payload size of one upstream FEC block. Unit: byte.
pub const XGPON1_US_FEC_DATA_SIZE: u32 = 232;

/// Per-device physical layer parameters.
///
/// These values are pure configuration. The allocation core never computes
/// them; it only reads them when sizing upstream bursts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phy {
    /// Size of the upstream PHY frame. Unit: word (4 bytes).
    pub us_frame_words: u32,

    /// Minimum guard time between two upstream bursts. Unit: word.
    pub guard_words: u32,

    /// Size of one upstream FEC code block. Unit: byte.
    pub us_fec_block_bytes: u32,

    /// Payload carried by one upstream FEC code block. Unit: byte.
    pub us_fec_data_bytes: u32,

    /// Upstream line rate. Unit: byte per second.
    pub us_rate_bytes_per_sec: u32,

    /// Downstream frame slot duration. Unit: nanosecond.
    pub frame_slot_ns: u32,
}

impl Default for Phy {
    fn default() -> Phy {
        Phy {
            // 311040000 B/s over one 125us slot is 38880 bytes, i.e. 9720
            // words of upstream capacity per frame.
            us_frame_words: 9720,
            guard_words: XGPON1_MINIMUM_GUARD_TIME,
            us_fec_block_bytes: XGPON1_FEC_BLOCK_SIZE,
            us_fec_data_bytes: XGPON1_US_FEC_DATA_SIZE,
            us_rate_bytes_per_sec: XGPON1_US_LINE_RATE,
            frame_slot_ns: XGPON1_DS_FRAME_SLOT_SIZE,
        }
    }
}
