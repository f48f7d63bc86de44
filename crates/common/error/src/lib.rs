// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{any::Any, error::Error as StdError};

use http::StatusCode as HttpStatusCode;
use serde::Serialize;
use strum::EnumProperty;

/// Coarse classification of a failure, used by drivers to pick an HTTP status
/// or a process exit code.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    #[strum(props(http_status = "400", exit_code = "64"))]
    InvalidArgument,
    #[strum(props(http_status = "416", exit_code = "65"))]
    RangeNotSatisfiable,
    #[strum(props(http_status = "404", exit_code = "66"))]
    NotFound,
    #[strum(props(http_status = "503", exit_code = "69"))]
    Unavailable,
    #[strum(props(http_status = "502", exit_code = "74"))]
    StorageFailure,
    #[strum(props(http_status = "499", exit_code = "130"))]
    Cancelled,
    #[strum(props(http_status = "500", exit_code = "70"))]
    Internal,
    #[strum(props(http_status = "500", exit_code = "1"))]
    Unknown,
}

impl StatusCode {
    pub fn http_status(self) -> HttpStatusCode {
        self.get_str("http_status")
            .and_then(|value| value.parse::<u16>().ok())
            .and_then(|value| HttpStatusCode::from_u16(value).ok())
            .unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn exit_code(self) -> i32 {
        self.get_str("exit_code")
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(1)
    }
}

pub trait ErrorExt: StdError {
    fn status_code(&self) -> StatusCode { StatusCode::Unknown }

    fn as_any(&self) -> &dyn Any;

    /// Message safe to show to an end user: internal failures are reduced to
    /// their status code, everything else is rendered with its root cause.
    fn output_msg(&self) -> String
    where
        Self: Sized,
    {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal => {
                format!("Internal error: {}", self.status_code())
            }
            _ => match self.root_cause() {
                Some(root) => format!("{self}: {root}"),
                None => format!("{self}"),
            },
        }
    }

    fn root_cause(&self) -> Option<&dyn StdError>
    where
        Self: Sized,
    {
        let mut source = self.source()?;
        while let Some(next) = source.source() {
            source = next;
        }
        Some(source)
    }
}
