use alloc::{collections::VecDeque, format, vec::Vec};

use spin::Mutex;

use lamina_core::{
    Result,
    aux::AuxTags,
    error::{CoreError, codes},
    filter::{Filter, LlSink, ProgressOutcome, UlSink},
    ll::ControlData,
};

/// 帧头魔数：两字节前导，解码器据此重新同步。
const MAGIC: [u8; 2] = [0xFE, 0x4C];
/// 帧头长度（魔数 + 大端 u16 载荷长度）。
const HEADER_LEN: usize = 4;
/// 帧尾长度（大端 u16 CRC-16/XMODEM）。
const TRAILER_LEN: usize = 2;

/// 控制操作：读取坏帧丢弃计数。
pub const CTL_DROPPED_FRAMES: u32 = 1;
/// 控制操作：读取最大帧长配置。
pub const CTL_MAX_FRAME_SIZE: u32 = 2;

/// 分帧过滤器配置。
#[derive(Clone, Copy, Debug)]
pub struct DelimConfig {
    /// 单条消息的最大载荷字节数；编码侧超限拒绝，解码侧超限重新同步。
    pub max_frame_size: usize,
}

impl Default for DelimConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 65535,
        }
    }
}

impl DelimConfig {
    /// 设置最大帧长。
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.min(65535);
        self
    }
}

struct PendingFrame {
    data: Vec<u8>,
    pos: usize,
}

struct DelimState {
    out: VecDeque<u8>,
    frames: VecDeque<PendingFrame>,
    partial: Vec<u8>,
    dropped: u64,
}

/// `DelimFilter` 把字节流切成"魔数 + 长度 + 载荷 + CRC16"的消息帧。
///
/// # 设计背景（Why）
/// - 数据报式应用跑在流式传输上时需要找回消息边界；本过滤器对内容完全
///   透明：一次用户写编码为一帧，解码后以一次读事件交付，边界保持。
/// - 无握手：`try_connect`/`try_disconnect` 立即完成，使它同时成为栈
///   运行时数据泵的最小真实验证载荷。
///
/// # 行为概览（How）
/// - 编码：`帧 = MAGIC ‖ len(u16 BE) ‖ payload ‖ crc16(payload)(BE)`；
/// - 解码：按魔数同步，长度齐全后校验 CRC；坏帧丢弃并计数，从下一个
///   魔数候选处重新同步；
/// - 上行交付允许部分消费：未消费的消息尾部保留在内部队列，待下一次
///   排水继续。
///
/// # 契约说明（What）
/// - 实现 `Send + Sync`，内部状态由自旋锁保护；调用数据出口（sink）时
///   一律不持内部锁，遵守过滤器契约的锁纪律。
pub struct DelimFilter {
    config: DelimConfig,
    state: Mutex<DelimState>,
}

impl DelimFilter {
    /// 以给定配置构造过滤器。
    pub fn new(config: DelimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DelimState {
                out: VecDeque::new(),
                frames: VecDeque::new(),
                partial: Vec::new(),
                dropped: 0,
            }),
        }
    }

    /// 已丢弃的坏帧数。
    pub fn dropped_frames(&self) -> u64 {
        self.state.lock().dropped
    }

    fn encode_into(out: &mut VecDeque<u8>, sg: &[&[u8]]) {
        let total: usize = sg.iter().map(|chunk| chunk.len()).sum();
        out.extend(MAGIC);
        out.extend(((total as u16).to_be_bytes()).iter().copied());
        let mut crc = Crc16::new();
        for chunk in sg {
            crc.update(chunk);
            out.extend(chunk.iter().copied());
        }
        out.extend(crc.finish().to_be_bytes().iter().copied());
    }

    /// 从累积的输入中切出完整帧；坏帧计数并重新同步。
    fn scan_frames(&self, st: &mut DelimState) {
        loop {
            // 先对齐魔数
            let mut dropped_garbage = false;
            while st.partial.len() >= 2 && st.partial[..2] != MAGIC {
                st.partial.remove(0);
                dropped_garbage = true;
            }
            if dropped_garbage {
                st.dropped += 1;
            }
            if st.partial.len() < HEADER_LEN {
                return;
            }
            let payload_len =
                u16::from_be_bytes([st.partial[2], st.partial[3]]) as usize;
            if payload_len > self.config.max_frame_size {
                // 超限视为同步错误：吃掉魔数，从下一个候选处重来。
                st.partial.drain(..2);
                st.dropped += 1;
                continue;
            }
            let total = HEADER_LEN + payload_len + TRAILER_LEN;
            if st.partial.len() < total {
                return;
            }
            let payload_end = HEADER_LEN + payload_len;
            let expect = u16::from_be_bytes([st.partial[payload_end], st.partial[payload_end + 1]]);
            let mut crc = Crc16::new();
            crc.update(&st.partial[HEADER_LEN..payload_end]);
            if crc.finish() == expect {
                let data = st.partial[HEADER_LEN..payload_end].to_vec();
                st.frames.push_back(PendingFrame { data, pos: 0 });
            } else {
                st.dropped += 1;
            }
            st.partial.drain(..total);
        }
    }

    /// 把待发字节推给下层出口；锁外调用 sink，短写与错误都把余量还回队首。
    fn drain_down(&self, aux: &AuxTags, sink: &mut dyn LlSink) -> Result<()> {
        loop {
            let pending: Vec<u8> = {
                let mut st = self.state.lock();
                if st.out.is_empty() {
                    return Ok(());
                }
                st.out.drain(..).collect()
            };
            let outcome = sink.write(&[&pending], aux);
            let written = match outcome {
                Ok(written) => written,
                Err(err) => {
                    self.requeue_front(&pending);
                    return Err(err);
                }
            };
            if written < pending.len() {
                self.requeue_front(&pending[written..]);
                return Ok(());
            }
        }
    }

    fn requeue_front(&self, remainder: &[u8]) {
        let mut st = self.state.lock();
        for &byte in remainder.iter().rev() {
            st.out.push_front(byte);
        }
    }

    /// 向上交付解码完的消息；部分消费时记录偏移，消息边界保持不变。
    fn drain_up(&self, sink: &mut dyn UlSink) -> Result<()> {
        loop {
            let (chunk, base_pos) = {
                let mut st = self.state.lock();
                let Some(front) = st.frames.front_mut() else {
                    return Ok(());
                };
                (front.data[front.pos..].to_vec(), front.pos)
            };
            let taken = sink.deliver(&chunk, &AuxTags::empty())?;
            let mut st = self.state.lock();
            let Some(front) = st.frames.front_mut() else {
                return Ok(());
            };
            front.pos = (base_pos + taken).min(front.data.len());
            if front.pos >= front.data.len() {
                st.frames.pop_front();
            } else if taken == 0 {
                // 上方背压：停止排水，等下一次读使能。
                return Ok(());
            }
        }
    }
}

impl Filter for DelimFilter {
    fn try_connect(&self) -> Result<ProgressOutcome> {
        Ok(ProgressOutcome::Complete)
    }

    fn try_disconnect(&self) -> Result<ProgressOutcome> {
        Ok(ProgressOutcome::Complete)
    }

    fn ul_write(&self, sg: &[&[u8]], aux: &AuxTags, sink: &mut dyn LlSink) -> Result<usize> {
        let mut consumed = 0;
        if !sg.is_empty() {
            let total: usize = sg.iter().map(|chunk| chunk.len()).sum();
            if total > self.config.max_frame_size {
                return Err(CoreError::new(
                    codes::INVALID_ARGUMENT,
                    format!(
                        "message length {} exceeds frame budget {}",
                        total, self.config.max_frame_size
                    ),
                ));
            }
            let mut st = self.state.lock();
            Self::encode_into(&mut st.out, sg);
            consumed = total;
        }
        self.drain_down(aux, sink)?;
        Ok(consumed)
    }

    fn ll_write(&self, buf: &[u8], _aux: &AuxTags, sink: &mut dyn UlSink) -> Result<usize> {
        if !buf.is_empty() {
            let mut st = self.state.lock();
            st.partial.extend_from_slice(buf);
            self.scan_frames(&mut st);
        }
        self.drain_up(sink)?;
        Ok(buf.len())
    }

    fn ul_read_pending(&self) -> bool {
        !self.state.lock().frames.is_empty()
    }

    fn ll_write_pending(&self) -> bool {
        !self.state.lock().out.is_empty()
    }

    fn ll_read_needed(&self) -> bool {
        false
    }

    fn cleanup(&self) {
        let mut st = self.state.lock();
        st.out.clear();
        st.frames.clear();
        st.partial.clear();
    }

    fn control(&self, get: bool, option: u32, data: &mut ControlData) -> Result<()> {
        if !get {
            return Err(CoreError::not_supported("filter options are read-only"));
        }
        match option {
            CTL_DROPPED_FRAMES => {
                data.value = format!("{}", self.state.lock().dropped);
                Ok(())
            }
            CTL_MAX_FRAME_SIZE => {
                data.value = format!("{}", self.config.max_frame_size);
                Ok(())
            }
            _ => Err(CoreError::not_supported("unknown filter option")),
        }
    }
}

/// CRC-16/XMODEM（多项式 0x1021，初值 0）。
struct Crc16 {
    crc: u16,
}

impl Crc16 {
    fn new() -> Self {
        Self { crc: 0 }
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                if self.crc & 0x8000 != 0 {
                    self.crc = (self.crc << 1) ^ 0x1021;
                } else {
                    self.crc <<= 1;
                }
            }
        }
    }

    fn finish(&self) -> u16 {
        self.crc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    /// 收集下行字节的测试出口，可配置单次接受上限制造短写。
    struct CollectLl {
        bytes: Vec<u8>,
        limit: Option<usize>,
    }

    impl LlSink for CollectLl {
        fn write(&mut self, sg: &[&[u8]], _aux: &AuxTags) -> Result<usize> {
            let budget = self.limit.unwrap_or(usize::MAX);
            let mut written = 0;
            'outer: for chunk in sg {
                for &byte in chunk.iter() {
                    if written >= budget {
                        break 'outer;
                    }
                    self.bytes.push(byte);
                    written += 1;
                }
            }
            Ok(written)
        }
    }

    /// 收集上行消息的测试出口，每次 deliver 记为一条消息。
    struct CollectUl {
        messages: Vec<Vec<u8>>,
        consume: Option<usize>,
    }

    impl UlSink for CollectUl {
        fn deliver(&mut self, buf: &[u8], _aux: &AuxTags) -> Result<usize> {
            let take = self.consume.unwrap_or(buf.len()).min(buf.len());
            self.messages.push(buf[..take].to_vec());
            Ok(take)
        }
    }

    fn encode_message(filter: &DelimFilter, msg: &[u8]) -> Vec<u8> {
        let mut sink = CollectLl {
            bytes: Vec::new(),
            limit: None,
        };
        let consumed = filter
            .ul_write(&[msg], &AuxTags::empty(), &mut sink)
            .unwrap();
        assert_eq!(consumed, msg.len());
        sink.bytes
    }

    #[test]
    fn round_trip_preserves_message_boundaries() {
        let sender = DelimFilter::new(DelimConfig::default());
        let receiver = DelimFilter::new(DelimConfig::default());

        let mut wire = encode_message(&sender, b"hello\n");
        wire.extend(encode_message(&sender, b"hello\n"));

        let mut sink = CollectUl {
            messages: Vec::new(),
            consume: None,
        };
        let consumed = receiver
            .ll_write(&wire, &AuxTags::empty(), &mut sink)
            .unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(
            sink.messages,
            vec![b"hello\n".to_vec(), b"hello\n".to_vec()],
            "两条消息必须以两次独立投递交付"
        );
    }

    #[test]
    fn incomplete_frame_waits_for_more_input() {
        let sender = DelimFilter::new(DelimConfig::default());
        let receiver = DelimFilter::new(DelimConfig::default());
        let wire = encode_message(&sender, b"split me");

        let mut sink = CollectUl {
            messages: Vec::new(),
            consume: None,
        };
        receiver
            .ll_write(&wire[..5], &AuxTags::empty(), &mut sink)
            .unwrap();
        assert!(sink.messages.is_empty(), "不完整帧不得提前交付");
        assert!(!receiver.ul_read_pending());

        receiver
            .ll_write(&wire[5..], &AuxTags::empty(), &mut sink)
            .unwrap();
        assert_eq!(sink.messages, vec![b"split me".to_vec()]);
    }

    #[test]
    fn corrupted_crc_drops_frame_and_resyncs() {
        let sender = DelimFilter::new(DelimConfig::default());
        let receiver = DelimFilter::new(DelimConfig::default());

        let mut bad = encode_message(&sender, b"corrupt");
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = encode_message(&sender, b"survives");

        let mut wire = bad;
        wire.extend(good);
        let mut sink = CollectUl {
            messages: Vec::new(),
            consume: None,
        };
        receiver
            .ll_write(&wire, &AuxTags::empty(), &mut sink)
            .unwrap();

        assert_eq!(sink.messages, vec![b"survives".to_vec()]);
        assert_eq!(receiver.dropped_frames(), 1);

        let mut data = ControlData::default();
        receiver.control(true, CTL_DROPPED_FRAMES, &mut data).unwrap();
        assert_eq!(data.value, "1");
    }

    #[test]
    fn short_write_keeps_remainder_queued() {
        let filter = DelimFilter::new(DelimConfig::default());
        let mut sink = CollectLl {
            bytes: Vec::new(),
            limit: Some(4),
        };
        filter
            .ul_write(&[b"payload"], &AuxTags::empty(), &mut sink)
            .unwrap();
        assert_eq!(sink.bytes.len(), 4, "短写只落下预算内的字节");
        assert!(filter.ll_write_pending());

        // 第二次排水（空散布）把剩余帧字节写完
        let mut rest = CollectLl {
            bytes: Vec::new(),
            limit: None,
        };
        filter
            .ul_write(&[], &AuxTags::empty(), &mut rest)
            .unwrap();
        assert!(!filter.ll_write_pending());

        let mut wire = sink.bytes;
        wire.extend(rest.bytes);
        let receiver = DelimFilter::new(DelimConfig::default());
        let mut ul = CollectUl {
            messages: Vec::new(),
            consume: None,
        };
        receiver.ll_write(&wire, &AuxTags::empty(), &mut ul).unwrap();
        assert_eq!(ul.messages, vec![b"payload".to_vec()]);
    }

    #[test]
    fn partial_upward_consume_resumes_at_offset() {
        let sender = DelimFilter::new(DelimConfig::default());
        let receiver = DelimFilter::new(DelimConfig::default());
        let wire = encode_message(&sender, b"0123456789");

        let mut first = CollectUl {
            messages: Vec::new(),
            consume: Some(4),
        };
        receiver
            .ll_write(&wire, &AuxTags::empty(), &mut first)
            .unwrap();
        assert_eq!(first.messages, vec![b"0123".to_vec()]);
        assert!(receiver.ul_read_pending(), "未消费尾部必须保留");

        let mut second = CollectUl {
            messages: Vec::new(),
            consume: None,
        };
        receiver
            .ll_write(&[], &AuxTags::empty(), &mut second)
            .unwrap();
        assert_eq!(second.messages, vec![b"456789".to_vec()]);
        assert!(!receiver.ul_read_pending());
    }

    #[test]
    fn oversized_message_is_rejected_on_encode() {
        let filter = DelimFilter::new(DelimConfig::default().with_max_frame_size(8));
        let mut sink = CollectLl {
            bytes: Vec::new(),
            limit: None,
        };
        let err = filter
            .ul_write(&[b"way too long for budget"], &AuxTags::empty(), &mut sink)
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ARGUMENT);
        assert!(sink.bytes.is_empty());
    }
}
