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

//! Error type for bandwidth allocation operations.

/// An error raised by the bandwidth allocation core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// There is no more work to do.
    Done,

    /// The configuration is invalid.
    InvalidConfig(String),

    /// No T-CONT is provisioned for the given Alloc-ID.
    NoTcont(u16),

    /// A timestamp fell outside every retained bookkeeping window. This
    /// indicates a wrong round-trip-time or history configuration and is
    /// fatal for the run.
    TemporalInconsistency(String),

    /// The internal allocation state is corrupted.
    InternalError,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}
