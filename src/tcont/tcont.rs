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

//! Per-circuit T-CONT state, OLT-side and ONU-side.

use rustc_hash::FxHashMap;
use slab::Slab;

use crate::Error;
use crate::Result;

/// Rolling time window for report and grant histories. Unit: nanosecond.
///
/// Entries older than this window can no longer influence any allocation
/// decision and are pruned on every insertion.
pub const HISTORY_TO_MAINTAIN: u64 = 1_000_000_000;

/// Arena of OLT-side T-CONTs, addressed by insertion index and looked up
/// by Alloc-ID.
///
/// T-CONTs must be provisioned in complete stride-4 groups, one group per
/// ONU, ordered T1, T2, T3, T4. The priority policies rely on that layout
/// for their class traversal.
#[derive(Default)]
pub struct TcontOltMap {
    /// OLT-side T-CONTs in provisioning order.
    tconts: Slab<TcontOlt>,

    /// Alloc-ID to arena index.
    alloc_index: FxHashMap<u16, usize>,
}

impl TcontOltMap {
    pub fn new() -> TcontOltMap {
        TcontOltMap::default()
    }

    /// Add a newly provisioned T-CONT.
    ///
    /// Fails if the Alloc-ID is already taken or the T-CONT breaks the
    /// stride-4 class layout.
    pub fn insert(&mut self, tcont: TcontOlt) -> Result<usize> {
        if self.alloc_index.contains_key(&tcont.alloc_id()) {
            return Err(Error::InvalidConfig(format!(
                "duplicate alloc id {}",
                tcont.alloc_id()
            )));
        }
        if self.tconts.len() % 4 != tcont.tcont_type().stride_index() {
            return Err(Error::InvalidConfig(format!(
                "tcont type {:?} breaks the stride-4 layout at index {}",
                tcont.tcont_type(),
                self.tconts.len()
            )));
        }

        let alloc_id = tcont.alloc_id();
        let index = self.tconts.insert(tcont);
        self.alloc_index.insert(alloc_id, index);
        Ok(index)
    }

    /// Number of provisioned T-CONTs.
    pub fn len(&self) -> usize {
        self.tconts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tconts.is_empty()
    }

    /// Arena index of the T-CONT with the given Alloc-ID.
    pub fn index_of(&self, alloc_id: u16) -> Option<usize> {
        self.alloc_index.get(&alloc_id).copied()
    }

    pub fn get(&self, index: usize) -> Option<&TcontOlt> {
        self.tconts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut TcontOlt> {
        self.tconts.get_mut(index)
    }

    pub fn get_by_alloc_id(&self, alloc_id: u16) -> Option<&TcontOlt> {
        self.index_of(alloc_id).and_then(|i| self.tconts.get(i))
    }

    pub fn get_mut_by_alloc_id(&mut self, alloc_id: u16) -> Option<&mut TcontOlt> {
        match self.index_of(alloc_id) {
            Some(i) => self.tconts.get_mut(i),
            None => None,
        }
    }

    pub fn iter(&self) -> slab::Iter<TcontOlt> {
        self.tconts.iter()
    }

    pub fn iter_mut(&mut self) -> slab::IterMut<TcontOlt> {
        self.tconts.iter_mut()
    }
}

impl std::ops::Index<usize> for TcontOltMap {
    type Output = TcontOlt;

    fn index(&self, index: usize) -> &TcontOlt {
        &self.tconts[index]
    }
}

impl std::ops::IndexMut<usize> for TcontOltMap {
    fn index_mut(&mut self, index: usize) -> &mut TcontOlt {
        &mut self.tconts[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::QosParameters;
    use crate::qos::TcontType;

    fn qos() -> QosParameters {
        QosParameters {
            fixed_bw: 10_000_000,
            assured_bw: 10_000_000,
            non_assured_bw: 10_000_000,
            best_effort_bw: 10_000_000,
            min_interval: 2,
            max_interval: 4,
        }
    }

    #[test]
    fn map_insert_and_lookup() -> Result<()> {
        let mut map = TcontOltMap::new();
        for (i, ttype) in [
            TcontType::Type1,
            TcontType::Type2,
            TcontType::Type3,
            TcontType::Type4,
        ]
        .iter()
        .enumerate()
        {
            let idx = map.insert(TcontOlt::new(100 + i as u16, 1, *ttype, qos()))?;
            assert_eq!(idx, i);
        }

        assert_eq!(map.len(), 4);
        assert_eq!(map.index_of(102), Some(2));
        assert_eq!(map.get_by_alloc_id(103).map(|t| t.tcont_type()), Some(TcontType::Type4));
        assert_eq!(map.index_of(999), None);
        Ok(())
    }

    #[test]
    fn map_rejects_duplicate_alloc_id() -> Result<()> {
        let mut map = TcontOltMap::new();
        map.insert(TcontOlt::new(100, 1, TcontType::Type1, qos()))?;
        assert!(matches!(
            map.insert(TcontOlt::new(100, 1, TcontType::Type2, qos())),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }

    #[test]
    fn map_rejects_broken_stride() -> Result<()> {
        let mut map = TcontOltMap::new();
        map.insert(TcontOlt::new(100, 1, TcontType::Type1, qos()))?;
        // A second T1 where a T2 is expected.
        assert!(matches!(
            map.insert(TcontOlt::new(101, 1, TcontType::Type1, qos())),
            Err(Error::InvalidConfig(_))
        ));
        Ok(())
    }
}

mod tcont_olt;
mod tcont_onu;

pub use self::tcont_olt::TcontOlt;
pub use self::tcont_olt::TIMER_EXPIRE_VALUE;
pub use self::tcont_onu::ConnectionSender;
pub use self::tcont_onu::TcontOnu;
