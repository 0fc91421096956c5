//! Multi-frame message reassembly
//!
//! Frames from multiple ECUs arrive interleaved within a single request
//! cycle.  The reassembler groups them by sequence key, orders them,
//! detects completion, and yields complete bus messages; stragglers are
//! flushed at the end of each cycle.

use std::collections::{BTreeMap, VecDeque};

use crate::frame::{BusMessage, Frame};

#[derive(Debug)]
struct Pending {
    /// Ordered slots, possibly sparse
    frames: Vec<Option<Frame>>,
    last_sequence_number: usize,
    sequence_length: Option<usize>,
}

/// Reassembles interleaved frames into ordered, complete bus messages.
///
/// The pending map is keyed by each frame's sequence key; completed
/// messages are queued in the order their sequences become complete.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: BTreeMap<Vec<u8>, Pending>,
    complete: VecDeque<BusMessage>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a received frame to the set of currently pending messages.
    ///
    /// If this frame completes a message, the message is queued and the
    /// pending entry removed in the same step.  Completion cannot always
    /// be determined here; see [`Reassembler::flush`].
    pub fn accept(&mut self, frame: Frame) {
        if frame.is_flow_control() {
            log::debug!("ignoring flow control frame: {:02X?}", frame.data);
            return;
        }

        let key = frame.sequence_key();
        let entry = self.pending.entry(key.clone()).or_insert_with(|| Pending {
            frames: Vec::new(),
            last_sequence_number: 0,
            sequence_length: None,
        });

        let sequence_number = frame.sequence_number(entry.last_sequence_number);
        if entry.sequence_length.is_none() {
            entry.sequence_length = frame.sequence_length();
        }

        // How many frames this response needs: the known length if any,
        // and always enough to hold this frame
        let mut frames_needed = entry.sequence_length.unwrap_or(0);
        if let Some(sn) = sequence_number {
            frames_needed = frames_needed.max(sn + 1);
        }
        while entry.frames.len() < frames_needed {
            entry.frames.push(None);
        }

        match sequence_number {
            Some(sn) => {
                entry.frames[sn] = Some(frame.clone());
                entry.last_sequence_number = sn;
            }
            None => {
                // unordered frames go into the first available slot
                match entry.frames.iter_mut().find(|slot| slot.is_none()) {
                    Some(slot) => *slot = Some(frame.clone()),
                    None => entry.frames.push(Some(frame.clone())),
                }
            }
        }

        let complete =
            entry.sequence_length.is_some() && entry.frames.iter().all(Option::is_some);
        if complete {
            let entry = match self.pending.remove(&key) {
                Some(entry) => entry,
                None => return,
            };
            let data = match entry.frames.first() {
                Some(Some(first)) => first.assemble_message(&entry.frames),
                _ => return,
            };
            self.complete.push_back(BusMessage::new(
                frame.header,
                data,
                entry.frames,
                frame.protocol,
            ));
        }
    }

    /// Flush all pending messages to the completed queue.
    ///
    /// Messages may be pending because a frame is missing or because
    /// completion could not be determined from the frames alone.  Call
    /// this when the response is known to be over (for request/response
    /// transactions, at the end of the cycle).  The pending map is
    /// cleared unconditionally.
    pub fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (_, entry) in pending {
            let donor = match entry.frames.iter().flatten().next() {
                Some(frame) => frame,
                None => {
                    debug_assert!(false, "pending entry with no frames received");
                    continue;
                }
            };
            if entry.frames.iter().all(Option::is_some) {
                // a full entry with a known length should have been
                // flushed the moment it completed
                debug_assert!(
                    entry.sequence_length.is_none(),
                    "complete message not flushed upon completion"
                );
            } else {
                log::debug!(
                    "flushing incomplete message ({} of {} frames)",
                    entry.frames.iter().flatten().count(),
                    entry.frames.len()
                );
            }
            let data = donor.assemble_message(&entry.frames);
            let header = donor.header.clone();
            let protocol = donor.protocol;
            self.complete
                .push_back(BusMessage::new(header, data, entry.frames, protocol));
        }
    }

    /// Remove and return all completed messages, in completion order.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        self.complete.drain(..).collect()
    }

    /// Discard all reassembly state (pending and completed).
    pub fn clear(&mut self) {
        self.pending.clear();
        self.complete.clear();
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Protocol;

    const CAN29: Protocol = Protocol::Iso15765_4 {
        id_bits: 29,
        baud: 500_000,
    };

    fn can_frame(ecu: u8, data: &[u8]) -> Frame {
        let mut raw = vec![0x18, 0xDA, 0xF1, ecu];
        raw.extend_from_slice(data);
        Frame::parse(CAN29, &raw).unwrap()
    }

    fn vin_frames() -> Vec<Frame> {
        vec![
            can_frame(0x10, &[0x10, 0x14, 0x49, 0x02, 0x01, 0x31, 0x47, 0x31]),
            can_frame(0x10, &[0x21, 0x4A, 0x43, 0x35, 0x34, 0x34, 0x34, 0x52]),
            can_frame(0x10, &[0x22, 0x37, 0x32, 0x35, 0x32, 0x33, 0x36, 0x37]),
        ]
    }

    fn vin_payload() -> Vec<u8> {
        let mut expected = vec![0x49, 0x02, 0x01];
        expected.extend_from_slice(b"1G1JC5444R7252367");
        expected
    }

    #[test]
    fn test_single_frame_completes_immediately() {
        let mut r = Reassembler::new();
        r.accept(can_frame(0x10, &[0x06, 0x41, 0x00, 0xBE, 0x1F, 0xB8, 0x10]));
        let messages = r.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].bytes().unwrap(),
            vec![0x41, 0x00, 0xBE, 0x1F, 0xB8, 0x10]
        );
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_multi_frame_in_order() {
        let mut r = Reassembler::new();
        for frame in vin_frames() {
            r.accept(frame);
        }
        r.flush();
        let messages = r.drain();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].incomplete);
        assert_eq!(messages[0].bytes().unwrap(), vin_payload());
    }

    #[test]
    fn test_multi_frame_any_permutation() {
        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in permutations {
            let frames = vin_frames();
            let mut r = Reassembler::new();
            for &i in &order {
                r.accept(frames[i].clone());
            }
            r.flush();
            let messages = r.drain();
            assert_eq!(messages.len(), 1, "order {:?}", order);
            assert_eq!(messages[0].bytes().unwrap(), vin_payload(), "order {:?}", order);
        }
    }

    #[test]
    fn test_missing_consecutive_frame_placeholders() {
        let frames = vin_frames();
        let mut r = Reassembler::new();
        r.accept(frames[0].clone());
        r.accept(frames[2].clone());
        r.flush();
        let messages = r.drain();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].incomplete);
        // nominal payload length, 7 placeholders for the dropped CF
        assert_eq!(messages[0].data.len(), 20);
        assert_eq!(messages[0].data.iter().filter(|b| b.is_none()).count(), 7);
    }

    #[test]
    fn test_missing_first_frame_placeholders() {
        let frames = vin_frames();
        let mut r = Reassembler::new();
        r.accept(frames[1].clone());
        r.accept(frames[2].clone());
        r.flush();
        let messages = r.drain();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].incomplete);
        // a dropped FF contributes 6 placeholders for its own slot
        assert_eq!(messages[0].data.iter().filter(|b| b.is_none()).count(), 6);
    }

    #[test]
    fn test_interleaved_ecus() {
        let mut r = Reassembler::new();
        // two ECUs answering 0100 interleaved with a multi-frame VIN
        let frames = vin_frames();
        r.accept(frames[0].clone());
        r.accept(can_frame(0x28, &[0x06, 0x41, 0x00, 0x80, 0x00, 0x00, 0x01]));
        r.accept(frames[1].clone());
        r.accept(frames[2].clone());
        r.flush();
        let messages = r.drain();
        assert_eq!(messages.len(), 2);
        // the single-frame answer completed first
        assert_eq!(messages[0].header.tx_id, Some(0x28));
        assert_eq!(messages[1].bytes().unwrap(), vin_payload());
    }

    #[test]
    fn test_flow_control_frames_ignored() {
        let mut r = Reassembler::new();
        r.accept(can_frame(0x10, &[0x30, 0x00, 0x00]));
        r.flush();
        assert!(r.drain().is_empty());
    }

    #[test]
    fn test_flush_clears_pending() {
        let mut r = Reassembler::new();
        let frames = vin_frames();
        r.accept(frames[0].clone());
        assert_eq!(r.pending_count(), 1);
        r.flush();
        assert_eq!(r.pending_count(), 0);
        // nothing left over for the next cycle
        r.drain();
        r.flush();
        assert!(r.drain().is_empty());
    }

    #[test]
    fn test_legacy_sid09_vin_five_frames() {
        let legacy = |data: &[u8]| {
            let mut raw = vec![0x48, 0x6B, 0x10];
            raw.extend_from_slice(data);
            raw.push(0x00);
            Frame::parse(Protocol::Iso9141_2, &raw).unwrap()
        };
        let vin = b"1G1JC5444R7252367";
        let mut frames = Vec::new();
        for i in 0..5 {
            let mut data = vec![0x49, 0x02, (i + 1) as u8];
            // frame 1 carries three NUL pad bytes before the VIN
            if i == 0 {
                data.extend_from_slice(&[0x00, 0x00, 0x00, vin[0]]);
            } else {
                data.extend_from_slice(&vin[(i * 4 - 3)..(i * 4 + 1)]);
            }
            frames.push(legacy(&data));
        }
        let mut r = Reassembler::new();
        // out of order on purpose
        for i in [2usize, 0, 4, 1, 3] {
            r.accept(frames[i].clone());
        }
        let messages = r.drain();
        assert_eq!(messages.len(), 1, "fixed-count sequence completes without flush");
        let bytes = messages[0].bytes().unwrap();
        assert_eq!(&bytes[..2], &[0x49, 0x02]);
        assert_eq!(&bytes[2..5], &[0x00, 0x00, 0x00]);
        assert_eq!(&bytes[5..], vin.as_slice());
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut r = Reassembler::new();
        let frames = vin_frames();
        r.accept(frames[0].clone());
        r.accept(can_frame(0x28, &[0x06, 0x41, 0x00, 0x80, 0x00, 0x00, 0x01]));
        r.clear();
        r.flush();
        assert!(r.drain().is_empty());
    }
}
