//! 文字相关的纯函数：MTEXT 格式码剥离与字宽估算。

/// ASCII 字符的平均字宽系数（相对字高）。
const NARROW_ADVANCE: f64 = 0.6;
/// 全角字符（CJK 等）的字宽系数。
const WIDE_ADVANCE: f64 = 1.0;
/// MTEXT 默认行距系数。
pub const MTEXT_LINE_SPACING: f64 = 5.0 / 3.0;

/// 将 MTEXT 原始内容转换为纯文本：段落符转换为换行，其余格式码全部剥离。
pub fn plain_mtext(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' | '}' => {}
            '\\' => match chars.next() {
                Some('P') | Some('N') | Some('X') => result.push('\n'),
                Some('~') => result.push(' '),
                Some('\\') => result.push('\\'),
                Some('{') => result.push('{'),
                Some('}') => result.push('}'),
                Some('S') => {
                    let mut stacked = String::new();
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                        stacked.push(next);
                    }
                    let upper_lower: Vec<&str> = stacked.splitn(2, ['^', '/', '#']).collect();
                    match upper_lower.as_slice() {
                        [upper, lower] => {
                            result.push_str(upper.trim());
                            result.push('/');
                            result.push_str(lower.trim());
                        }
                        _ => result.push_str(&stacked),
                    }
                }
                Some('A' | 'C' | 'c' | 'F' | 'f' | 'H' | 'h' | 'Q' | 'q' | 'T' | 't' | 'W'
                | 'w' | 'p') => {
                    for next in chars.by_ref() {
                        if next == ';' {
                            break;
                        }
                    }
                }
                Some('L' | 'l' | 'O' | 'o' | 'K' | 'k' | 'n') => {}
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            },
            '%' if chars.peek() == Some(&'%') => {
                chars.next();
                match chars.next() {
                    Some('c') | Some('C') => result.push('Ø'),
                    Some('d') | Some('D') => result.push('°'),
                    Some('p') | Some('P') => result.push('±'),
                    Some('%') => result.push('%'),
                    Some(other) => {
                        result.push_str("%%");
                        result.push(other);
                    }
                    None => result.push_str("%%"),
                }
            }
            other => result.push(other),
        }
    }
    result
}

/// TEXT 的控制码（`%%c` 等）替换为可见字符，下划线/上划线开关直接去掉。
pub fn plain_text(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '%' && chars.peek() == Some(&'%') {
            chars.next();
            match chars.next() {
                Some('c') | Some('C') => result.push('Ø'),
                Some('d') | Some('D') => result.push('°'),
                Some('p') | Some('P') => result.push('±'),
                Some('u') | Some('U') | Some('o') | Some('O') => {}
                Some('%') => result.push('%'),
                Some(other) => {
                    result.push_str("%%");
                    result.push(other);
                }
                None => result.push_str("%%"),
            }
        } else {
            result.push(ch);
        }
    }
    result
}

/// 估算单行文字宽度：ASCII 按 0.6 倍字高，其余按全角计。
pub fn line_advance(line: &str, height: f64) -> f64 {
    line.chars()
        .map(|ch| {
            if ch.is_ascii() {
                NARROW_ADVANCE
            } else {
                WIDE_ADVANCE
            }
        })
        .sum::<f64>()
        * height
}

/// 多行文字的最大行宽与行数。
pub fn block_extent(content: &str, height: f64) -> (f64, usize) {
    let mut width: f64 = 0.0;
    let mut lines = 0;
    for line in content.split('\n') {
        width = width.max(line_advance(line, height));
        lines += 1;
    }
    (width, lines.max(1))
}
