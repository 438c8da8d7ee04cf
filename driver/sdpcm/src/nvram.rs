//! 参数文本（nvram）预处理
//!
//! 输入是 `key=value` 文本，每行一项。去掉整行注释与空行、修剪首尾空白，每行以 NUL 结尾，
//! 末尾再补一个 NUL，整体补零到 4 字节对齐。

use alloc::vec::Vec;

fn trim(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &line[start..end.max(start)]
}

/// 把参数文本处理成下载到设备内存的格式。没有有效行时返回空。
pub fn process_vars(text: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 4);
    for raw in text.split(|&b| b == b'\n') {
        let line = trim(raw);
        if line.is_empty() || line[0] == b'#' {
            continue;
        }
        out.extend_from_slice(line);
        out.push(0);
    }
    if out.is_empty() {
        return out;
    }
    out.push(0);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// 在处理后的参数块里查找 `key` 的值。
pub fn find_var<'a>(vars: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let key = key.as_bytes();
    vars.split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .find_map(|entry| {
            let eq = entry.iter().position(|&b| b == b'=')?;
            (&entry[..eq] == key).then(|| &entry[eq + 1..])
        })
}

/// 设备内存顶部的长度标记：低 16 位是字数，高 16 位是其反码。
pub fn length_token(vars_len: usize) -> u32 {
    if vars_len == 0 {
        return 0;
    }
    let words = (vars_len / 4) as u32;
    ((!words & 0xffff) << 16) | (words & 0xffff)
}
