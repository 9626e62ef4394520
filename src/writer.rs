//! Dedicated writer task for a connection's outbound frames.
//!
//! Every sender (quest callers, handler tasks answering, the close path)
//! enqueues through a [`WriterHandle`]. A single task owns the write half of
//! the socket, so frames leave in the order they were queued.
//!
//! # Architecture
//!
//! ```text
//! send_quest ─┐
//! answers    ─┼─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► Socket
//! bye        ─┘
//! ```
//!
//! Ready frames are batched into one `write_vectored` call. After a batch is
//! written, each quest frame's result is told it has been sent. Writing a
//! bye shuts the write half down and ends the task.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::connection::QuestResult;
use crate::error::{Result, XicError};
use crate::protocol::{Frame, Header, MessageType, HEADER_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// What to do once a frame has been written.
#[derive(Debug, Default)]
pub enum Notice {
    #[default]
    None,
    /// Tell the result its quest is on the wire.
    Sent(QuestResult),
    /// Last frame: shut down after writing.
    Bye,
}

/// A frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Body bytes, empty for hello and bye.
    pub body: Bytes,
    pub notice: Notice,
}

impl OutboundFrame {
    #[inline]
    pub fn new(header: &Header, body: Bytes) -> Self {
        Self {
            header: header.encode(),
            body,
            notice: Notice::None,
        }
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self::new(&frame.header, frame.body)
    }

    pub fn hello() -> Self {
        Self::new(&Header::control(MessageType::Hello), Bytes::new())
    }

    pub fn bye() -> Self {
        Self {
            notice: Notice::Bye,
            ..Self::new(&Header::control(MessageType::Bye), Bytes::new())
        }
    }

    pub fn with_notice(mut self, notice: Notice) -> Self {
        self.notice = notice;
        self
    }

    /// Total size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Handle for queueing frames to the writer task.
///
/// Cheaply cloneable. Sending never waits.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

/// Receiving side, handed to [`run_writer`] once the socket exists.
pub struct WriterQueue {
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

/// Create a writer channel. Frames can be queued before the socket is up.
pub fn writer_channel() -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WriterHandle { tx }, WriterQueue { rx })
}

impl WriterHandle {
    /// Queue a frame.
    ///
    /// Fails with `ConnectionClosed` once the writer task has gone.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| XicError::ConnectionClosed)
    }
}

/// Writer loop: drain the queue into `writer` until bye, channel close, or
/// a write failure.
pub async fn run_writer<W>(mut queue: WriterQueue, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match queue.rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        let mut last = matches!(first.notice, Notice::Bye);
        batch.push(first);

        while !last && batch.len() < MAX_BATCH_SIZE {
            match queue.rx.try_recv() {
                Ok(frame) => {
                    last = matches!(frame.notice, Notice::Bye);
                    batch.push(frame);
                }
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;

        for frame in &batch {
            if let Notice::Sent(result) = &frame.notice {
                result.quest_sent();
            }
        }

        if last {
            writer.shutdown().await?;
            return Ok(());
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(batch.len() * 2);
    for frame in batch {
        slices.push(IoSlice::new(&frame.header));
        if !frame.body.is_empty() {
            slices.push(IoSlice::new(&frame.body));
        }
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();

    let written = writer.write_vectored(&slices).await?;
    if written == total_size {
        writer.flush().await?;
        return Ok(());
    }
    if written == 0 {
        return Err(write_zero());
    }

    // Partial write, continue with the remainder.
    let mut total_written = written;
    while total_written < total_size {
        let remaining_slices = build_remaining_slices(batch, total_written);
        if remaining_slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&remaining_slices).await?;
        if written == 0 {
            return Err(write_zero());
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

fn write_zero() -> XicError {
    XicError::from(std::io::Error::new(
        std::io::ErrorKind::WriteZero,
        "write_vectored returned 0",
    ))
}

/// Build IoSlice array for remaining data after partial write.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let header_start = skipped;
        let header_end = skipped + HEADER_SIZE;
        if skip_bytes < header_end {
            let start_in_header = skip_bytes.saturating_sub(header_start);
            slices.push(IoSlice::new(&frame.header[start_in_header..]));
        }
        skipped = header_end;

        if !frame.body.is_empty() {
            let body_start = skipped;
            let body_end = skipped + frame.body.len();
            if skip_bytes < body_end {
                let start_in_body = skip_bytes.saturating_sub(body_start);
                slices.push(IoSlice::new(&frame.body[start_in_body..]));
            }
            skipped = body_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Map;
    use crate::protocol::{Message, Quest};
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn quest_frame(i: i32) -> OutboundFrame {
        let mut quest = Quest::new("S", "m", Map::from([("i", i)]));
        quest.txid = i;
        OutboundFrame::from_frame(Frame::from_message(&Message::Quest(quest)))
    }

    #[test]
    fn test_outbound_frame_creation() {
        let header = Header::new(MessageType::Answer, 5);
        let frame = OutboundFrame::new(&header, Bytes::from_static(b"hello"));
        assert_eq!(frame.size(), HEADER_SIZE + 5);

        let bye = OutboundFrame::bye();
        assert!(bye.body.is_empty());
        assert!(matches!(bye.notice, Notice::Bye));
        assert_eq!(&bye.header, b"X!B\0\0\0\0\0");
    }

    #[tokio::test]
    async fn test_frames_written_in_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, queue) = writer_channel();
        let task = tokio::spawn(run_writer(queue, client));

        handle.send(OutboundFrame::hello()).unwrap();
        let mut expected = b"X!H\0\0\0\0\0".to_vec();
        for i in 1..=10 {
            let frame = quest_frame(i);
            expected.extend_from_slice(&frame.header);
            expected.extend_from_slice(&frame.body);
            handle.send(frame).unwrap();
        }
        handle.send(OutboundFrame::bye()).unwrap();
        expected.extend_from_slice(b"X!B\0\0\0\0\0");

        task.await.unwrap().unwrap();

        let mut got = Vec::new();
        server.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_sent_notice_after_write() {
        let (client, _server) = duplex(4096);
        let (handle, queue) = writer_channel();
        let result = QuestResult::new("S", "m", None);

        handle
            .send(quest_frame(1).with_notice(Notice::Sent(result.clone())))
            .unwrap();
        handle.send(OutboundFrame::bye()).unwrap();
        run_writer(queue, client).await.unwrap();

        assert!(result.is_sent());
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (handle, queue) = writer_channel();
        drop(queue);
        assert!(matches!(
            handle.send(OutboundFrame::hello()),
            Err(XicError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, queue) = writer_channel();
        let task = tokio::spawn(run_writer(queue, client));
        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let header = Header::new(MessageType::Quest, 5);
        let batch = vec![OutboundFrame::new(&header, Bytes::from_static(b"hello"))];

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (1..=5).map(quest_frame).collect();
        let total: usize = batch.iter().map(|f| f.size()).sum();

        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner().len(), total);
    }
}
