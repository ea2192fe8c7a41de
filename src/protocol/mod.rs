//! Wire protocol requests and responses.
//!
//! Every API the client speaks is a request/response pair: the request
//! implements [`ToByte`](crate::encode::ToByte) (header first, then body)
//! and the response has a nom parser consuming the bytes after the
//! response header. One module per API family:
//!
//! | API | Key | Module |
//! |-----|-----|--------|
//! | Produce | 0 | `produce` |
//! | Fetch | 1 | `fetch` |
//! | ListOffsets | 2 | `offsets` |
//! | Metadata | 3 | `metadata` |
//! | OffsetCommit | 8 | `offsets` |
//! | OffsetFetch | 9 | `offsets` |
//! | GroupCoordinator | 10 | `groups` |
//! | JoinGroup | 11 | `groups` |
//! | Heartbeat | 12 | `groups` |
//! | LeaveGroup | 13 | `groups` |
//! | SyncGroup | 14 | `groups` |
//!
//! Requests are framed as `size (i32) + api_key (i16) + api_version (i16)
//! + correlation_id (i32) + client_id (string) + body`; responses as
//! `size (i32) + correlation_id (i32) + body`. The size prefix is applied
//! by the connection, not here.

pub mod fetch;
pub mod groups;
pub mod messages;
pub mod metadata;
pub mod offsets;
pub mod produce;

use bytes::BufMut;
use nom::{IResult, number::complete::be_i32};
use nombytes::NomBytes;

use crate::encode::ToByte;
use crate::error::Result;

/// Header prepended to every request.
#[derive(Debug, Clone)]
pub struct HeaderRequest {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: String,
}

impl HeaderRequest {
    pub fn new(api_key: i16, api_version: i16, correlation_id: i32, client_id: &str) -> Self {
        Self {
            api_key,
            api_version,
            correlation_id,
            client_id: client_id.to_string(),
        }
    }
}

impl ToByte for HeaderRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.api_key.encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.encode(buffer)?;
        Ok(())
    }
}

/// Header of every response.
#[derive(Debug, Clone, Copy)]
pub struct HeaderResponse {
    pub correlation_id: i32,
}

pub fn parse_header_response(s: NomBytes) -> IResult<NomBytes, HeaderResponse> {
    let (s, correlation_id) = be_i32(s)?;
    Ok((s, HeaderResponse { correlation_id }))
}
