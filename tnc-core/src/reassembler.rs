//! RX-side reassembly state machine (§4.2 "Decoding", §4.3).
//!
//! One [`ModeState`] runs per [`Mode`], because the controller speculatively
//! decodes the same incoming audio through every mode's codec instance at
//! once — the remote's chosen mode isn't known ahead of time. Whichever
//! mode's collector completes a packet first wins; the others are reset so
//! stale in-progress data from a redundant decode never leaks out.

use crate::frame::{classify_header, SegmentKind};
use crate::mode::Mode;
use crate::packet::{HeaderType, Packet, MAX_PACKET_LEN};
use std::collections::HashMap;

/// Receives packets as they complete reassembly.
pub trait PacketSink {
    fn packet_received(&mut self, packet: Packet);
}

/// Receives byte-count progress for a packet still being collected, for UI
/// feedback during a long receive (§4.3).
pub trait ProgressSink {
    fn progress(&mut self, mode: Mode, received: usize, total: usize);
}

impl<F: FnMut(Packet)> PacketSink for F {
    fn packet_received(&mut self, packet: Packet) {
        self(packet)
    }
}

#[derive(Debug, Clone)]
enum ModeState {
    Idle,
    Collecting {
        header: HeaderType,
        total_len: usize,
        buf: Vec<u8>,
        expected_seq: u8,
    },
}

/// The shared reassembly state machine, one collector per mode.
pub struct Reassembler {
    states: HashMap<Mode, ModeState>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self {
            states: Mode::ALL.iter().map(|&m| (m, ModeState::Idle)).collect(),
        }
    }

    /// True if `mode` currently has a packet in progress.
    pub fn is_collecting(&self, mode: Mode) -> bool {
        matches!(self.states.get(&mode), Some(ModeState::Collecting { .. }))
    }

    /// Feed one decoded frame's payload (post CRC-check, pre-trailer) for
    /// `mode`. A frame may contain more than one segment (coalescing), so
    /// this scans until the frame is exhausted.
    pub fn feed_frame(
        &mut self,
        mode: Mode,
        payload: &[u8],
        sink: &mut impl PacketSink,
        progress: &mut impl ProgressSink,
    ) {
        let mut pos = 0usize;
        let mut completed = false;

        while pos < payload.len() {
            let state = self.states.entry(mode).or_insert(ModeState::Idle);

            match state {
                ModeState::Idle => match classify_header(payload[pos]) {
                    SegmentKind::Continuation(seq) => {
                        if seq != 0 {
                            log::debug!("{mode}: unexpected continuation seq {seq} while idle");
                        }
                        // End-of-meaningful-data padding: nothing more to
                        // read in this frame.
                        break;
                    }
                    SegmentKind::Start => {
                        if pos + 3 > payload.len() {
                            log::warn!("{mode}: truncated start segment, dropping rest of frame");
                            break;
                        }
                        let header = HeaderType::from(payload[pos]);
                        let total_len =
                            u16::from_be_bytes([payload[pos + 1], payload[pos + 2]]) as usize;
                        if total_len >= MAX_PACKET_LEN {
                            log::warn!("{mode}: start segment claims {total_len} bytes, rejecting");
                            pos = payload.len();
                            continue;
                        }
                        let body_start = pos + 3;
                        let avail = payload.len() - body_start;
                        let chunk = avail.min(total_len);
                        let data = &payload[body_start..body_start + chunk];

                        if chunk == total_len {
                            sink.packet_received(
                                Packet::new(data.to_vec(), header)
                                    .expect("already bounds-checked")
                                    .with_mode(mode),
                            );
                            completed = true;
                            pos = body_start + chunk;
                        } else {
                            progress.progress(mode, data.len(), total_len);
                            *state = ModeState::Collecting {
                                header,
                                total_len,
                                buf: data.to_vec(),
                                expected_seq: 0,
                            };
                            pos = payload.len();
                        }
                    }
                },
                ModeState::Collecting {
                    header,
                    total_len,
                    buf,
                    expected_seq,
                } => match classify_header(payload[pos]) {
                    SegmentKind::Start => {
                        log::warn!(
                            "{mode}: expected continuation seq {expected_seq}, got a start segment; \
                             aborting in-progress packet"
                        );
                        *state = ModeState::Idle;
                        // Reprocess this byte now that we're idle again.
                    }
                    SegmentKind::Continuation(seq) => {
                        if seq != *expected_seq {
                            log::warn!(
                                "{mode}: expected continuation seq {expected_seq}, got {seq}; \
                                 aborting in-progress packet"
                            );
                            *state = ModeState::Idle;
                            continue;
                        }
                        let needed = *total_len - buf.len();
                        let avail = payload.len() - (pos + 1);
                        let chunk = avail.min(needed);
                        buf.extend_from_slice(&payload[pos + 1..pos + 1 + chunk]);
                        pos += 1 + chunk;

                        if buf.len() >= *total_len {
                            sink.packet_received(
                                Packet::new(std::mem::take(buf), *header)
                                    .expect("already bounds-checked")
                                    .with_mode(mode),
                            );
                            completed = true;
                            *state = ModeState::Idle;
                        } else {
                            progress.progress(mode, buf.len(), *total_len);
                            *expected_seq += 1;
                            pos = payload.len();
                        }
                    }
                },
            }
        }

        if completed {
            // First complete packet wins: any other mode still mid-collect
            // was decoding the same redundant audio, so drop its state.
            for (&other_mode, other_state) in self.states.iter_mut() {
                if other_mode != mode {
                    *other_state = ModeState::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16_ccitt;
    use crate::frame::{encode, verify_and_strip};
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Collected(Vec<Packet>);
    impl PacketSink for Collected {
        fn packet_received(&mut self, packet: Packet) {
            self.0.push(packet);
        }
    }

    #[derive(Default)]
    struct NoProgress;
    impl ProgressSink for NoProgress {
        fn progress(&mut self, _mode: Mode, _received: usize, _total: usize) {}
    }

    fn frames_for(packets: Vec<Packet>, bytes_per_frame: usize) -> Vec<Vec<u8>> {
        let mut q: VecDeque<Packet> = packets.into();
        encode(&mut q, bytes_per_frame, 5, crc16_ccitt)
    }

    fn feed_all(r: &mut Reassembler, mode: Mode, frames: &[Vec<u8>]) -> Vec<Packet> {
        let mut sink = Collected::default();
        let mut progress = NoProgress;
        for frame in frames {
            let payload = verify_and_strip(frame, crc16_ccitt).expect("valid crc");
            r.feed_frame(mode, payload, &mut sink, &mut progress);
        }
        sink.0
    }

    #[test]
    fn reassembles_a_multi_frame_packet() {
        let data = vec![0x7Au8; 300];
        let frames = frames_for(vec![Packet::kiss(data.clone()).unwrap()], 64);
        let mut r = Reassembler::new();
        let got = feed_all(&mut r, Mode::DataC1, &frames);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data, data);
        assert!(!r.is_collecting(Mode::DataC1));
    }

    #[test]
    fn reassembles_coalesced_packets_from_one_frame() {
        let frames = frames_for(
            vec![
                Packet::kiss(b"one".to_vec()).unwrap(),
                Packet::kiss(b"two".to_vec()).unwrap(),
            ],
            64,
        );
        assert_eq!(frames.len(), 1);
        let mut r = Reassembler::new();
        let got = feed_all(&mut r, Mode::DataC1, &frames);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, b"one");
        assert_eq!(got[1].data, b"two");
    }

    #[test]
    fn missing_continuation_aborts_and_resumes_on_next_start() {
        let data = vec![0x11u8; 300];
        let mut frames = frames_for(vec![Packet::kiss(data).unwrap()], 64);
        // Drop the middle continuation frame to simulate a lost segment,
        // then append a fresh small packet that should still decode.
        assert!(frames.len() >= 3);
        frames.remove(1);
        let fresh = frames_for(vec![Packet::kiss(b"recovered".to_vec()).unwrap()], 64);
        frames.extend(fresh);

        let mut r = Reassembler::new();
        let got = feed_all(&mut r, Mode::DataC1, &frames);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data, b"recovered");
    }

    #[test]
    fn first_mode_to_complete_resets_others() {
        let mut r = Reassembler::new();
        let long_frames = frames_for(vec![Packet::kiss(vec![0u8; 300]).unwrap()], 64);
        let mut sink = Collected::default();
        let mut progress = NoProgress;

        let payload = verify_and_strip(&long_frames[0], crc16_ccitt).unwrap();
        r.feed_frame(Mode::DataC3, payload, &mut sink, &mut progress);
        assert!(r.is_collecting(Mode::DataC3));

        let short_frames = frames_for(vec![Packet::kiss(b"hi".to_vec()).unwrap()], 64);
        let payload = verify_and_strip(&short_frames[0], crc16_ccitt).unwrap();
        r.feed_frame(Mode::DataC1, payload, &mut sink, &mut progress);

        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].data, b"hi");
        assert!(!r.is_collecting(Mode::DataC3));
    }

    #[test]
    fn progress_is_reported_while_collecting() {
        struct Tracker(Vec<(usize, usize)>);
        impl ProgressSink for Tracker {
            fn progress(&mut self, _mode: Mode, received: usize, total: usize) {
                self.0.push((received, total));
            }
        }
        let frames = frames_for(vec![Packet::kiss(vec![0u8; 300]).unwrap()], 64);
        let mut r = Reassembler::new();
        let mut sink = Collected::default();
        let mut tracker = Tracker(Vec::new());
        for frame in &frames {
            let payload = verify_and_strip(frame, crc16_ccitt).unwrap();
            r.feed_frame(Mode::DataC1, payload, &mut sink, &mut tracker);
        }
        assert!(!tracker.0.is_empty());
        assert_eq!(tracker.0.last().unwrap().1, 300);
    }
}
