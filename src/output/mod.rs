//! 输出行组装模块
//! 将远程通道的字节流切分为完整行，并按约定写入捕获缓冲区

/// 行缓冲器
///
/// 远程通道的数据块不按行边界到达，此缓冲器累积字节并在每个 `\n`
/// 处产出一行。行尾的 `\r` 在产出前剥离。
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个数据块，返回该块中结束的所有完整行（按出现顺序）
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                lines.push(self.take_line());
            } else {
                self.buf.push(byte);
            }
        }
        lines
    }

    /// 产出尚未以换行符结束的剩余内容（命令完成时调用）
    pub fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    /// 是否有未产出的残留字节
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_line(&mut self) -> String {
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }
}

/// 向捕获缓冲区追加一行
///
/// 行之间以单个 `\n` 分隔，末尾不带换行符。捕获 `a`、`b`、`c`
/// 三行得到 `"a\nb\nc"`。
pub fn append_line(sink: &mut String, line: &str) {
    if !sink.is_empty() {
        sink.push('\n');
    }
    sink.push_str(line);
}
