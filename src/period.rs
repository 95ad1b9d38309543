//! Period-rate adapters multiplexing the server's fixed cycle size into the
//! client's own period.
//!
//! The input side accumulates server frames in the shadow buffer until one
//! full client period is ready; the output side drains exactly one server
//! period per cycle and carries any surplus the client produced. Both sides
//! run without allocating, and the ratio between the two periods may be
//! arbitrary, including non-divisible.

use crate::shadow::ShadowConverter;
use crate::{BridgeError, emit_error};

/// Outcome of feeding one server cycle into an input adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advance {
    /// A full client period is staged at shadow offset zero.
    Ready,
    /// More server cycles are needed before the client can run.
    NotReady,
}

/// Number of silent frames seeded into an input adapter so that the output
/// side can always be fed across the initial transient.
///
/// Exact ratios carry nothing from cycle to cycle; inexact ratios need up to
/// one full client period of slack.
pub fn silence_prefill(client_frames: u32, server_frames: u32) -> u32 {
    if server_frames > client_frames {
        if server_frames % client_frames == 0 {
            0
        } else {
            client_frames
        }
    } else if server_frames < client_frames {
        if client_frames % server_frames == 0 {
            client_frames - server_frames
        } else {
            client_frames
        }
    } else {
        0
    }
}

/// Accumulates server-delivered frames until one client period is staged.
pub struct InputAdapter {
    conv: ShadowConverter,
    dst_frames: u32,
    /// Frames currently staged in the shadow buffer.
    shadow_frames: u32,
    /// Position within the current server block for the next copy-in.
    server_offset: u32,
}

impl InputAdapter {
    /// Wrap `conv` for a client period of `dst_frames`, seeding
    /// `silence_prefill` zero frames.
    pub fn new(mut conv: ShadowConverter, dst_frames: u32, silence_prefill: u32) -> Self {
        conv.silence_shadow(silence_prefill);
        Self {
            conv,
            dst_frames,
            shadow_frames: silence_prefill,
            server_offset: 0,
        }
    }

    /// Feed the current server block of `server_frames` frames.
    ///
    /// On `Ready` the staged period is considered consumed by the client
    /// callback that immediately follows, so `shadow_frames` resets to zero
    /// while `server_offset` keeps its position: the same server block can
    /// satisfy several client periods in one cycle.
    pub fn advance(&mut self, server_frames: u32) -> Result<Advance, BridgeError> {
        if self.shadow_frames > self.dst_frames {
            return Err(BridgeError::InputOverrun {
                have: self.shadow_frames,
                limit: self.dst_frames,
            });
        }
        let available = server_frames - self.server_offset;
        if self.shadow_frames + available >= self.dst_frames {
            let missing = self.dst_frames - self.shadow_frames;
            self.conv
                .copy_from_server(self.shadow_frames, self.server_offset, missing);
            self.server_offset += missing;
            self.shadow_frames = 0;
            Ok(Advance::Ready)
        } else {
            self.conv
                .copy_from_server(self.shadow_frames, self.server_offset, available);
            self.shadow_frames += available;
            self.server_offset = 0;
            Ok(Advance::NotReady)
        }
    }

    /// Staged client period, valid only for `frames == dst_frames`.
    pub fn buffer(&mut self, frames: u32) -> Option<*mut u8> {
        if frames != self.dst_frames {
            emit_error(
                BridgeError::FrameMismatch {
                    requested: frames,
                    configured: self.dst_frames,
                }
                .to_string(),
            );
            return None;
        }
        Some(self.conv.shadow_at(0))
    }
}

/// Collects client-produced frames and emits exactly one server period per
/// cycle, carrying any surplus.
pub struct OutputAdapter {
    conv: ShadowConverter,
    dst_frames: u32,
    /// Frames staged but not yet drained to the server.
    shadow_frames: u32,
    /// Read position of the first staged frame.
    shadow_offset: u32,
    /// Frames written by the client this cycle, not yet folded into
    /// `shadow_frames`.
    client_frames: u32,
}

impl OutputAdapter {
    /// Wrap `conv` for a client period of `dst_frames`.
    pub fn new(conv: ShadowConverter, dst_frames: u32) -> Self {
        Self {
            conv,
            dst_frames,
            shadow_frames: 0,
            shadow_offset: 0,
            client_frames: 0,
        }
    }

    /// First free shadow slot for the client to write one period into, valid
    /// only for `frames == dst_frames`.
    pub fn buffer(&mut self, frames: u32) -> Option<*mut u8> {
        if frames != self.dst_frames {
            emit_error(
                BridgeError::FrameMismatch {
                    requested: frames,
                    configured: self.dst_frames,
                }
                .to_string(),
            );
            return None;
        }
        Some(self.write_slot())
    }

    /// Store one client period from `src`, unless `src` already is the slot
    /// returned by the matching `buffer` call.
    ///
    /// # Safety
    ///
    /// `src` must reference at least `frames` frames in the converter's
    /// sample format.
    pub unsafe fn set(&mut self, src: *const u8, frames: u32) {
        if frames != self.dst_frames {
            emit_error(
                BridgeError::FrameMismatch {
                    requested: frames,
                    configured: self.dst_frames,
                }
                .to_string(),
            );
            return;
        }
        let dst = self.write_slot();
        if src == dst as *const u8 {
            return;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(src, dst, frames as usize * self.conv.sample_size())
        };
    }

    /// Fold one client period into the pending count. Called once per
    /// successful client callback.
    pub fn note_client_wrote(&mut self) {
        self.client_frames += self.dst_frames;
    }

    /// Drain up to one server period of `server_frames` frames.
    ///
    /// When not enough frames are staged the server keeps its prior contents
    /// for this cycle; the staged count still grows by what the client wrote.
    /// Any tail short enough to fit the next drain is compacted back to the
    /// shadow base.
    pub fn advance(&mut self, server_frames: u32) -> Result<(), BridgeError> {
        let limit = server_frames.max(self.dst_frames);
        if self.shadow_frames > limit {
            return Err(BridgeError::OutputOverrun {
                have: self.shadow_frames,
                limit,
            });
        }
        if self.shadow_frames + self.client_frames >= server_frames {
            let src = self.conv.shadow_at(self.shadow_offset);
            unsafe { self.conv.copy_to_server(src, 0, 0, server_frames) };
            self.shadow_frames = self.shadow_frames + self.client_frames - server_frames;
            self.shadow_offset += server_frames;
            if self.shadow_frames == 0 {
                self.shadow_offset = 0;
            }
        } else {
            self.shadow_frames += self.client_frames;
        }
        if self.shadow_offset > 0 && self.shadow_frames <= server_frames {
            self.conv.compact(self.shadow_offset, self.shadow_frames);
            self.shadow_offset = 0;
        }
        self.client_frames = 0;
        Ok(())
    }

    fn write_slot(&mut self) -> *mut u8 {
        self.conv
            .shadow_at(self.shadow_offset + self.shadow_frames + self.client_frames)
    }
}
