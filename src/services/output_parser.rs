//! 模型输出解析服务
//!
//! 把模型返回的文本解析成六个维度的判断，并负责拆分批量响应。

use crate::models::{Construct, ConstructJudgement};
use regex::Regex;

/// 维度标题行，引文在遇到它时结束
const HEADING_PATTERN: &str = r"(?i)^(?:[A-Z ]+ SATISFACTION|COMPETENCE FRUSTRATION|AUTONOMY FRUSTRATION|RELATEDNESS FRUSTRATION|[A-Z ]+ QUOTE)\s*:";

/// 批量响应分隔标记
const BATCH_SPLIT_PATTERN: &str = r"Review\s*\d+\s*Analysis\s*:";

/// 单个维度的匹配规则
#[derive(Debug, Clone)]
struct ConstructPattern {
    flag: Regex,
    quote: Regex,
}

/// 模型输出解析器
#[derive(Debug, Clone)]
pub struct OutputParser {
    patterns: Vec<ConstructPattern>,
    heading: Regex,
    splitter: Regex,
}

impl OutputParser {
    /// 编译全部匹配规则
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = Construct::ALL
            .into_iter()
            .map(|construct| {
                let key = regex::escape(construct.key());
                Ok(ConstructPattern {
                    flag: Regex::new(&format!(
                        r"(?mi)^\s*{}:\s*\[?\s*(TRUE|FALSE)\s*\]?",
                        key
                    ))?,
                    quote: Regex::new(&format!(r"(?mi)^[ \t]*{} QUOTE:[ \t]*", key))?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            patterns,
            heading: Regex::new(HEADING_PATTERN)?,
            splitter: Regex::new(BATCH_SPLIT_PATTERN)?,
        })
    }

    /// 解析单条评论的模型输出
    ///
    /// 空输出时全部维度为未知
    pub fn parse(&self, output: &str) -> [ConstructJudgement; 6] {
        let mut judgements: [ConstructJudgement; 6] = Default::default();
        if output.trim().is_empty() {
            return judgements;
        }

        for (slot, pattern) in judgements.iter_mut().zip(&self.patterns) {
            let flag = pattern
                .flag
                .captures(output)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().eq_ignore_ascii_case("TRUE"));

            let quote = match flag {
                Some(true) => self.extract_quote(&pattern.quote, output),
                _ => String::new(),
            };

            *slot = ConstructJudgement { flag, quote };
        }
        judgements
    }

    /// 提取引文：从 `KEY QUOTE:` 之后到下一个标题行、空行或文本结尾
    fn extract_quote(&self, quote_re: &Regex, output: &str) -> String {
        let Some(found) = quote_re.find(output) else {
            return String::new();
        };
        let rest = &output[found.end()..];

        let mut end = rest.len();
        let mut offset = 0;
        for (index, line) in rest.split_inclusive('\n').enumerate() {
            if index > 0 {
                let content = line.trim();
                if content.is_empty() || self.heading.is_match(content) {
                    end = offset;
                    break;
                }
            }
            offset += line.len();
        }

        rest[..end].trim().replace('"', "")
    }

    /// 拆分批量响应
    ///
    /// 第一个标记之前的内容丢弃；返回的片段按顺序对应批次中的评论，可能为空串
    pub fn split_batch<'a>(&self, output: &'a str) -> Vec<&'a str> {
        self.splitter.split(output).skip(1).map(str::trim).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> OutputParser {
        OutputParser::new().unwrap()
    }

    const SAMPLE: &str = r#"
COMPETENCE SATISFACTION: TRUE
COMPETENCE SATISFACTION QUOTE: "I finally beat the boss"
COMPETENCE FRUSTRATION: [FALSE]
COMPETENCE FRUSTRATION QUOTE: something ignored
AUTONOMY SATISFACTION: true
AUTONOMY SATISFACTION QUOTE: I can build anything
and play my own way
AUTONOMY FRUSTRATION: FALSE
RELATEDNESS SATISFACTION: TRUE
RELATEDNESS SATISFACTION QUOTE:
RELATEDNESS FRUSTRATION: TRUE
RELATEDNESS FRUSTRATION QUOTE: "toxic" chat"#;

    #[test]
    fn test_parse_flags_and_quotes() {
        let result = parser().parse(SAMPLE);

        assert_eq!(result[0].flag, Some(true));
        assert_eq!(result[0].quote, "I finally beat the boss");

        // 判断为假时不保留引文
        assert_eq!(result[1].flag, Some(false));
        assert_eq!(result[1].quote, "");

        // 多行引文持续到下一个标题
        assert_eq!(result[2].flag, Some(true));
        assert_eq!(result[2].quote, "I can build anything\nand play my own way");

        assert_eq!(result[3].flag, Some(false));

        // 引文为空
        assert_eq!(result[4].flag, Some(true));
        assert_eq!(result[4].quote, "");

        // 最后一行没有换行也能取到
        assert_eq!(result[5].flag, Some(true));
        assert_eq!(result[5].quote, "toxic chat");
    }

    #[test]
    fn test_parse_missing_construct_is_unknown() {
        let result = parser().parse("COMPETENCE SATISFACTION: FALSE");
        assert_eq!(result[0].flag, Some(false));
        for judgement in &result[1..] {
            assert_eq!(judgement.flag, None);
            assert!(judgement.quote.is_empty());
        }
    }

    #[test]
    fn test_parse_empty_output() {
        let result = parser().parse("   ");
        assert!(result.iter().all(|j| j.flag.is_none() && j.quote.is_empty()));
    }

    #[test]
    fn test_split_batch_drops_preamble() {
        let output = "Here you go.\nReview 1 Analysis:\nfirst\nReview 2 Analysis :\n\nReview3Analysis: third";
        let parts = parser().split_batch(output);
        assert_eq!(parts, vec!["first", "", "third"]);
    }
}
