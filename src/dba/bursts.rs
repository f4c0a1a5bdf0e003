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

//! Per-ONU burst accumulation for one BW-MAP production cycle.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::phy::Phy;
use crate::report::BurstProfile;
use crate::report::BwAllocation;
use crate::report::BwMap;
use crate::Error;
use crate::Result;

/// At most 16 grants can share one upstream burst.
pub const MAX_TCONT_PER_BURST: usize = 16;

/// At most 64 grants per ONU in one BW-MAP, i.e. 4 full bursts.
pub const MAX_TCONT_PER_ONU: usize = 64;

/// XGTC burst header plus trailer, without PLOAM. Unit: word.
const XGTC_BURST_HEADER_TRAILER_WORDS: u32 = 2;

/// One PLOAM message is 48 bytes. Unit: word.
const PLOAM_WORDS: u32 = 12;

/// One upstream burst under construction: the grants of a single ONU that
/// will be transmitted back to back behind one preamble.
#[derive(Default)]
pub struct PerBurstInfo {
    onu_id: u16,

    /// Guard time plus preamble and delimiter. Unit: word.
    gap_phy_overhead: u32,

    /// Whether this burst is FEC coded.
    fec: bool,

    /// Payload words of one FEC code block.
    data_block_words: u32,

    /// Total words of one FEC code block.
    fec_block_words: u32,

    /// XGTC header, trailer, PLOAM and all granted data. Unit: word.
    header_trailer_data_words: u32,

    /// Size of the burst on the wire, FEC parity and gap included.
    /// Unit: word.
    final_burst_size: u32,

    /// Grants of this burst, in transmission order.
    grants: SmallVec<[BwAllocation; 4]>,
}

impl PerBurstInfo {
    /// Set up the burst for the given ONU. Called when the first grant is
    /// placed into a freshly created burst.
    pub fn initialize(&mut self, onu_id: u16, ploam: bool, profile: &BurstProfile, phy: &Phy) {
        self.onu_id = onu_id;
        self.gap_phy_overhead =
            phy.guard_words + ((profile.preamble_bytes + profile.delimiter_bytes) / 4) as u32;
        self.fec = profile.fec;
        self.data_block_words = phy.us_fec_data_bytes / 4;
        self.fec_block_words = phy.us_fec_block_bytes / 4;

        self.header_trailer_data_words = XGTC_BURST_HEADER_TRAILER_WORDS;
        if ploam {
            self.header_trailer_data_words += PLOAM_WORDS;
        }

        self.update_final_burst_size();
        self.grants.clear();
    }

    pub fn onu_id(&self) -> u16 {
        self.onu_id
    }

    pub fn grant_count(&self) -> usize {
        self.grants.len()
    }

    /// Size of the burst on the wire. Unit: word.
    pub fn final_burst_size(&self) -> u32 {
        self.final_burst_size
    }

    /// Guard time plus preamble and delimiter. Unit: word.
    pub fn gap_phy_overhead(&self) -> u32 {
        self.gap_phy_overhead
    }

    /// XGTC header, trailer, PLOAM and granted data. Unit: word.
    pub fn header_trailer_data_words(&self) -> u32 {
        self.header_trailer_data_words
    }

    pub fn has_grant_for(&self, alloc_id: u16) -> bool {
        self.grants.iter().any(|g| g.alloc_id == alloc_id)
    }

    /// Append a new grant to the burst and re-derive the wire size.
    pub fn add_grant(&mut self, grant: BwAllocation) {
        self.header_trailer_data_words += grant.grant_size as u32;
        self.grants.push(grant);
        self.update_final_burst_size();
    }

    /// Extend the grant this burst already holds for `alloc_id`.
    pub fn add_to_existing_grant(&mut self, alloc_id: u16, extra_words: u32) {
        for grant in self.grants.iter_mut() {
            if grant.alloc_id == alloc_id {
                grant.grant_size += extra_words as u16;
                self.header_trailer_data_words += extra_words;
                self.update_final_burst_size();
                return;
            }
        }
    }

    /// The wire size is the XGTC content expanded to FEC code blocks, with
    /// a shortened last block when the content is not a whole number of
    /// data blocks, plus the physical layer gap.
    fn update_final_burst_size(&mut self) {
        if self.fec {
            let tmp = self.header_trailer_data_words % self.data_block_words;
            let mut burst_size =
                (self.header_trailer_data_words / self.data_block_words) * self.fec_block_words;
            if tmp != 0 {
                burst_size += tmp + (self.fec_block_words - self.data_block_words);
            }
            self.final_burst_size = burst_size + self.gap_phy_overhead;
        } else {
            self.final_burst_size = self.header_trailer_data_words + self.gap_phy_overhead;
        }
    }

    /// Stamp the burst's position in the frame and emit its grants.
    fn put_grants_into_map(&mut self, map: &mut BwMap, start_time: u16) {
        if let Some(first) = self.grants.first_mut() {
            first.start_time = start_time;
        }
        map.allocations.extend(self.grants.iter().cloned());
    }
}

/// The bursts accumulated while producing one BW-MAP, most recently
/// touched first, plus the set of T-CONTs already granted in this map.
#[derive(Default)]
pub struct Bursts {
    bursts: VecDeque<PerBurstInfo>,
    served: FxHashSet<u16>,
}

impl Bursts {
    pub fn new() -> Bursts {
        Bursts::default()
    }

    /// Drop all bursts and served marks. Called at the start of every
    /// production cycle.
    pub fn clear(&mut self) {
        self.bursts.clear();
        self.served.clear();
    }

    /// Whether the T-CONT already received a grant in the current BW-MAP.
    pub fn is_tcont_served(&self, alloc_id: u16) -> bool {
        self.served.contains(&alloc_id)
    }

    pub fn set_tcont_served(&mut self, alloc_id: u16) {
        self.served.insert(alloc_id);
    }

    pub fn burst_count(&self) -> usize {
        self.bursts.len()
    }

    /// Whether serving this ONU requires opening a new burst, because no
    /// burst of the ONU has room for another grant.
    pub fn is_new_burst_necessary(&self, onu_id: u16) -> bool {
        !self
            .bursts
            .iter()
            .any(|b| b.onu_id() == onu_id && b.grant_count() < MAX_TCONT_PER_BURST)
    }

    /// Find the open burst of the ONU, or open a new one when every burst
    /// of the ONU is full and the ONU is below its per-map grant limit.
    ///
    /// The returned burst is moved to the front of the list, so the most
    /// recently touched burst is always placed last in the produced map.
    /// Returns `None` when the ONU cannot take any further grant.
    pub fn burst_for_onu(&mut self, onu_id: u16) -> Option<&mut PerBurstInfo> {
        let mut grants4onu = 0;
        let mut open = None;
        for (i, burst) in self.bursts.iter().enumerate() {
            if burst.onu_id() == onu_id {
                if burst.grant_count() < MAX_TCONT_PER_BURST {
                    open = Some(i);
                    break;
                }
                grants4onu += burst.grant_count();
            }
        }

        if let Some(i) = open {
            if let Some(burst) = self.bursts.remove(i) {
                self.bursts.push_front(burst);
            }
            return self.bursts.front_mut();
        }

        if grants4onu < MAX_TCONT_PER_ONU {
            self.bursts.push_front(PerBurstInfo::default());
            self.bursts.front_mut()
        } else {
            None
        }
    }

    /// Lay the accumulated bursts into the upstream frame and emit the
    /// grant list.
    ///
    /// Bursts are emitted oldest first, so the burst that may spill past
    /// the frame boundary is the last one; an overflowing burst in the
    /// middle would push the start times of later short bursts past the
    /// frame and the OLT could no longer receive them. The first word of
    /// the frame may still be occupied by the spillover of the previous
    /// map, given by `extra_in_last_bwmap`.
    pub fn produce_bwmap(&mut self, extra_in_last_bwmap: u16, frame_words: u32) -> Result<BwMap> {
        debug_assert!((extra_in_last_bwmap as u32) < frame_words - 10);

        let mut map = BwMap::new();

        if self.bursts.is_empty() {
            return Ok(map);
        }

        if self.bursts.len() == 1 {
            let burst = match self.bursts.front_mut() {
                Some(b) => b,
                None => return Err(Error::InternalError),
            };
            let start_time = extra_in_last_bwmap as u32 + burst.gap_phy_overhead();
            if start_time >= frame_words {
                // The previous map over-allocated too much; skip this slot.
                return Ok(map);
            }
            burst.put_grants_into_map(&mut map, start_time as u16);
            return Ok(map);
        }

        let mut start_time = extra_in_last_bwmap as u32;
        for burst in self.bursts.iter_mut().rev() {
            start_time += burst.gap_phy_overhead();
            if start_time >= frame_words {
                return Err(Error::InternalError);
            }
            burst.put_grants_into_map(&mut map, start_time as u16);
            start_time -= burst.gap_phy_overhead();
            start_time += burst.final_burst_size();
        }

        Ok(map)
    }

    /// Cap a tentative grant so the resulting burst still fits into the
    /// remaining words of the upstream frame, accounting for the FEC
    /// expansion the grant will suffer on the wire.
    ///
    /// Mirrors the wrap-around behavior of unsigned arithmetic: when the
    /// frame is already overdrawn the remaining size goes huge instead of
    /// negative, and the tentative grant passes through untouched. The
    /// production loop bounds such over-allocation separately.
    pub fn fit_to_frame(
        &mut self,
        onu_id: u16,
        size2_assign: u32,
        allocated: u32,
        phy: &Phy,
        profile: &BurstProfile,
    ) -> u32 {
        let frame = phy.us_frame_words;
        let guard = phy.guard_words;
        let preamble_delimiter = ((profile.preamble_bytes + profile.delimiter_bytes) / 4) as u32;
        let data_block = phy.us_fec_data_bytes / 4;
        let block = phy.us_fec_block_bytes / 4;
        let parity = (phy.us_fec_block_bytes - phy.us_fec_data_bytes) / 4;

        let new_burst = self.is_new_burst_necessary(onu_id);

        let size_remaining = if new_burst {
            if profile.fec {
                // XGTC header and trailer ride in the same FEC blocks.
                let mut fec_blocks = (2 + size2_assign) / data_block;
                if (2 + size2_assign) % data_block != 0 {
                    fec_blocks += 1;
                }
                let code_words = fec_blocks * parity;
                frame
                    .wrapping_sub(allocated)
                    .wrapping_sub(guard)
                    .wrapping_sub(preamble_delimiter)
                    .wrapping_sub(code_words)
                    .wrapping_sub(2)
            } else {
                frame
                    .wrapping_sub(allocated)
                    .wrapping_sub(guard)
                    .wrapping_sub(preamble_delimiter)
                    .wrapping_sub(2)
            }
        } else if profile.fec {
            let (_, old_code_words) = self.open_burst_fec_overheads(onu_id, phy);
            frame.wrapping_sub(allocated.wrapping_sub(old_code_words))
        } else {
            frame.wrapping_sub(allocated)
        };

        if size2_assign <= size_remaining {
            return size2_assign;
        }

        // Not enough room for the full request.
        if !profile.fec {
            return size_remaining;
        }

        // With FEC the maximum that still fits must be recomputed, since a
        // smaller grant also carries less parity.
        if new_burst {
            let size_remaining_no_fec = frame
                .wrapping_sub(allocated)
                .wrapping_sub(guard)
                .wrapping_sub(preamble_delimiter);

            let fec_blocks = size_remaining_no_fec / block;
            let mut data_remainder = 0;
            if size_remaining_no_fec % block != 0 {
                data_remainder = size_remaining_no_fec
                    .wrapping_sub(fec_blocks * block)
                    .wrapping_sub(parity);
            }
            (fec_blocks * phy.us_fec_data_bytes / 4)
                .wrapping_add(data_remainder)
                .wrapping_sub(2)
        } else {
            let (old_data_words, old_code_words) = self.open_burst_fec_overheads(onu_id, phy);

            let new_coded_burst_size =
                frame.wrapping_sub(allocated.wrapping_sub(old_code_words).wrapping_sub(old_data_words));
            let new_fec_blocks = new_coded_burst_size / block;
            let mut new_data_words = new_fec_blocks * data_block;
            if new_coded_burst_size % block != 0 {
                let shortened_coded_block = new_coded_burst_size % block;
                new_data_words = new_data_words
                    .wrapping_add(shortened_coded_block)
                    .wrapping_sub(parity);
            }
            new_data_words.wrapping_sub(old_data_words)
        }
    }

    /// FEC data and parity words already committed to the open burst of
    /// the ONU. The lookup touches the burst, keeping it in front.
    fn open_burst_fec_overheads(&mut self, onu_id: u16, phy: &Phy) -> (u32, u32) {
        let data_block = phy.us_fec_data_bytes / 4;

        let header_trailer_data = match self.burst_for_onu(onu_id) {
            Some(burst) => burst.header_trailer_data_words(),
            None => 0,
        };

        let old_data_words = header_trailer_data / phy.us_fec_data_bytes / 4;
        let mut old_fec_blocks = old_data_words / data_block;
        if old_data_words % data_block != 0 {
            old_fec_blocks += 1;
        }
        let parity = (phy.us_fec_block_bytes - phy.us_fec_data_bytes) / 4;

        (old_data_words, old_fec_blocks * parity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst_with_grant(onu_id: u16, grant_words: u16, fec: bool) -> PerBurstInfo {
        let profile = BurstProfile {
            fec,
            ..Default::default()
        };
        let mut burst = PerBurstInfo::default();
        burst.initialize(onu_id, false, &profile, &Phy::default());
        burst.add_grant(BwAllocation::new(1024, true, false, 0, grant_words, 0));
        burst
    }

    #[test]
    fn burst_size_without_fec() {
        // Gap is 2 guard words plus (20+4)/4 preamble and delimiter words.
        // Content is 2 header words plus the grant.
        let burst = burst_with_grant(1, 100, false);
        assert_eq!(burst.final_burst_size(), 8 + 2 + 100);
    }

    #[test]
    fn burst_size_with_fec_padding() {
        // 102 content words are one full 58-word data block plus a
        // shortened block of 44 words; the full block codes to 62 words
        // and the shortened one carries 4 parity words.
        let burst = burst_with_grant(1, 100, true);
        assert_eq!(burst.final_burst_size(), 62 + 44 + 4 + 8);
    }

    #[test]
    fn burst_size_with_whole_fec_blocks() {
        // 2 + 114 = 116 content words are exactly two data blocks.
        let burst = burst_with_grant(1, 114, true);
        assert_eq!(burst.final_burst_size(), 2 * 62 + 8);
    }

    #[test]
    fn merging_grows_the_existing_grant() {
        let mut burst = burst_with_grant(1, 100, false);
        burst.add_to_existing_grant(1024, 50);
        assert_eq!(burst.grant_count(), 1);
        assert_eq!(burst.final_burst_size(), 8 + 2 + 150);
    }

    #[test]
    fn one_open_burst_per_onu() {
        let mut bursts = Bursts::new();
        assert!(bursts.is_new_burst_necessary(1));

        let burst = bursts.burst_for_onu(1).unwrap();
        burst.initialize(1, false, &BurstProfile::default(), &Phy::default());
        burst.add_grant(BwAllocation::new(1024, true, false, 0, 10, 0));

        assert!(!bursts.is_new_burst_necessary(1));
        assert!(bursts.is_new_burst_necessary(2));

        // The second request for the same ONU lands in the same burst.
        let burst = bursts.burst_for_onu(1).unwrap();
        burst.add_grant(BwAllocation::new(1025, true, false, 0xFFFF, 10, 0));
        assert_eq!(bursts.burst_count(), 1);
    }

    #[test]
    fn full_burst_forces_a_new_one() {
        let mut bursts = Bursts::new();
        let burst = bursts.burst_for_onu(1).unwrap();
        burst.initialize(1, false, &BurstProfile::default(), &Phy::default());
        for i in 0..MAX_TCONT_PER_BURST {
            burst.add_grant(BwAllocation::new(1024 + i as u16, true, false, 0, 10, 0));
        }

        assert!(bursts.is_new_burst_necessary(1));
        let burst = bursts.burst_for_onu(1).unwrap();
        assert_eq!(burst.grant_count(), 0);
        assert_eq!(bursts.burst_count(), 2);
    }

    #[test]
    fn onu_grant_limit_is_enforced() {
        let mut bursts = Bursts::new();
        for b in 0..MAX_TCONT_PER_ONU / MAX_TCONT_PER_BURST {
            let burst = bursts.burst_for_onu(1).unwrap();
            burst.initialize(1, false, &BurstProfile::default(), &Phy::default());
            for i in 0..MAX_TCONT_PER_BURST {
                let alloc = (b * MAX_TCONT_PER_BURST + i) as u16;
                burst.add_grant(BwAllocation::new(alloc, true, false, 0, 10, 0));
            }
        }
        assert!(bursts.burst_for_onu(1).is_none());
    }

    #[test]
    fn served_marks_reset_with_the_cycle() {
        let mut bursts = Bursts::new();
        bursts.set_tcont_served(1024);
        assert!(bursts.is_tcont_served(1024));
        bursts.clear();
        assert!(!bursts.is_tcont_served(1024));
    }

    #[test]
    fn bwmap_orders_bursts_oldest_first() -> Result<()> {
        let phy = Phy::default();
        let profile = BurstProfile {
            fec: false,
            ..Default::default()
        };

        let mut bursts = Bursts::new();
        for (onu, alloc) in [(1u16, 1024u16), (2, 2048)] {
            let burst = bursts.burst_for_onu(onu).unwrap();
            burst.initialize(onu, false, &profile, &phy);
            burst.add_grant(BwAllocation::new(alloc, true, false, 0, 100, 0));
        }

        let map = bursts.produce_bwmap(0, phy.us_frame_words)?;
        assert_eq!(map.len(), 2);

        // ONU 1 was touched first, so its burst comes first and starts
        // right after its own gap.
        assert_eq!(map.allocations[0].alloc_id, 1024);
        assert_eq!(map.allocations[0].start_time, 8);
        // ONU 2 starts behind the full first burst (110 words) plus its
        // own gap.
        assert_eq!(map.allocations[1].alloc_id, 2048);
        assert_eq!(map.allocations[1].start_time, 110 + 8);
        Ok(())
    }

    #[test]
    fn continuation_grants_keep_their_marker() -> Result<()> {
        let phy = Phy::default();
        let profile = BurstProfile {
            fec: false,
            ..Default::default()
        };

        let mut bursts = Bursts::new();
        let burst = bursts.burst_for_onu(1).unwrap();
        burst.initialize(1, false, &profile, &phy);
        burst.add_grant(BwAllocation::new(1024, true, false, 0, 100, 0));
        burst.add_grant(BwAllocation::new(1025, true, false, 0xFFFF, 50, 0));

        let map = bursts.produce_bwmap(0, phy.us_frame_words)?;
        assert_eq!(map.allocations[0].start_time, 8);
        assert_eq!(map.allocations[1].start_time, 0xFFFF);
        Ok(())
    }

    #[test]
    fn lone_overflowing_burst_yields_empty_map() -> Result<()> {
        let phy = Phy::default();
        // A long preamble makes the gap 2 + (60 + 4) / 4 = 18 words.
        let profile = BurstProfile {
            fec: false,
            preamble_bytes: 60,
            ..Default::default()
        };

        let mut bursts = Bursts::new();
        let burst = bursts.burst_for_onu(1).unwrap();
        burst.initialize(1, false, &profile, &phy);
        burst.add_grant(BwAllocation::new(1024, true, false, 0, 100, 0));

        // The previous map left 11 words of frame, not enough for even
        // the gap of the lone burst.
        let map = bursts.produce_bwmap((phy.us_frame_words - 11) as u16, phy.us_frame_words)?;
        assert!(map.is_empty());
        Ok(())
    }

    #[test]
    fn fit_keeps_a_fitting_grant_untouched() {
        let phy = Phy::default();
        let profile = BurstProfile::default();
        let mut bursts = Bursts::new();
        assert_eq!(bursts.fit_to_frame(1, 1000, 0, &phy, &profile), 1000);
    }

    #[test]
    fn fit_caps_to_the_fec_coded_frame_remainder() {
        let phy = Phy::default();
        let profile = BurstProfile::default();
        let mut bursts = Bursts::new();

        // 9000 words already allocated leave 720 words of coded capacity,
        // so a 5000-word request must shrink to what survives the FEC
        // expansion and the burst overheads.
        let allocated = 9000;
        let capped = bursts.fit_to_frame(1, 5000, allocated, &phy, &profile);
        assert!(capped < 5000);

        // The capped grant must fit: build the burst and check it against
        // the frame.
        let burst = bursts.burst_for_onu(1).unwrap();
        burst.initialize(1, false, &profile, &phy);
        burst.add_grant(BwAllocation::new(1024, true, false, 0, capped as u16, 0));
        assert!(allocated + burst.final_burst_size() <= phy.us_frame_words);
    }

    #[test]
    fn fit_is_maximal_for_a_shortened_fec_block() {
        // 248-byte code blocks carrying 216 data bytes each.
        let phy = Phy {
            us_fec_data_bytes: 216,
            ..Default::default()
        };
        let profile = BurstProfile::default();
        let mut bursts = Bursts::new();

        // 50 words remain in the frame, so an 80-word request must
        // shrink to what survives the coding overhead.
        let allocated = phy.us_frame_words - 50;
        let capped = bursts.fit_to_frame(1, 80, allocated, &phy, &profile);
        assert!(capped < 80);

        // The capped grant fits, and it is the largest grant that does.
        for (grant, fits) in [(capped, true), (capped + 1, false)] {
            let mut trial = Bursts::new();
            let burst = trial.burst_for_onu(1).unwrap();
            burst.initialize(1, false, &profile, &phy);
            burst.add_grant(BwAllocation::new(1024, true, false, 0, grant as u16, 0));
            assert_eq!(
                allocated + burst.final_burst_size() <= phy.us_frame_words,
                fits
            );
        }
    }

    #[test]
    fn fit_passes_through_when_frame_is_overdrawn() {
        let phy = Phy::default();
        let profile = BurstProfile::default();
        let mut bursts = Bursts::new();

        // Unsigned wrap: with more allocated than the frame holds, the
        // remainder goes huge and the request is not capped here.
        let capped = bursts.fit_to_frame(1, 500, phy.us_frame_words + 100, &phy, &profile);
        assert_eq!(capped, 500);
    }
}
