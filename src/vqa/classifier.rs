//! VQA回答分类 (自由文本 → 布尔)
//!
//! 否定词优先: 命中 no/not/none/isn't/aren't 或 아니/없 时一律为 false。

use once_cell::sync::Lazy;
use regex::Regex;

static NEGATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:no|not|none|isn't|aren't)\b|아니|없").expect("static negative pattern")
});

/// 问题类型, 决定使用哪组肯定关键词
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Fallen,
    Helmet,
    Generic,
}

impl QuestionKind {
    pub fn question(&self) -> &'static str {
        match self {
            QuestionKind::Fallen => "Is the person lying on the floor? Answer yes or no.",
            QuestionKind::Helmet => "Is the person wearing an industrial safety helmet? Answer yes or no.",
            QuestionKind::Generic => "Answer yes or no.",
        }
    }

    fn positives(&self) -> &'static [&'static str] {
        match self {
            QuestionKind::Fallen => &["yes", "lying", "laying", "fallen", "on the floor"],
            QuestionKind::Helmet => &["yes", "wearing", "wear", "착용"],
            QuestionKind::Generic => &["yes", "true"],
        }
    }
}

/// 可替换的回答分类器
pub trait AnswerClassifier: Send + Sync {
    fn classify(&self, kind: QuestionKind, answer: &str) -> bool;
}

/// 关键词匹配分类器
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn is_negative(answer: &str) -> bool {
        NEGATIVE.is_match(answer)
    }
}

impl AnswerClassifier for KeywordClassifier {
    fn classify(&self, kind: QuestionKind, answer: &str) -> bool {
        if Self::is_negative(answer) {
            return false;
        }
        let answer = answer.to_lowercase();
        kind.positives().iter().any(|kw| answer.contains(kw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_wins_over_positive() {
        let c = KeywordClassifier;
        assert!(!c.classify(QuestionKind::Helmet, "No, the person is not wearing a helmet"));
        assert!(!c.classify(QuestionKind::Fallen, "Yes? no."));
        assert!(!c.classify(QuestionKind::Generic, "None"));
        assert!(!c.classify(QuestionKind::Helmet, "He isn't wearing one"));
    }

    #[test]
    fn test_korean_helmet_answers() {
        let c = KeywordClassifier;
        assert!(c.classify(QuestionKind::Helmet, "안전모를 착용하고 있습니다"));
        assert!(!c.classify(QuestionKind::Helmet, "안전모를 착용하지 않았습니다, 없음"));
        assert!(!c.classify(QuestionKind::Helmet, "아니요"));
    }

    #[test]
    fn test_positive_keywords_per_kind() {
        let c = KeywordClassifier;
        assert!(c.classify(QuestionKind::Fallen, "Yes"));
        assert!(c.classify(QuestionKind::Fallen, "the person is lying down"));
        assert!(c.classify(QuestionKind::Helmet, "wearing a yellow hard hat"));
        assert!(!c.classify(QuestionKind::Helmet, "lying"));
        assert!(c.classify(QuestionKind::Generic, "TRUE"));
    }

    #[test]
    fn test_korean_negation() {
        let c = KeywordClassifier;
        assert!(!c.classify(QuestionKind::Helmet, "yes 아니요"));
        assert!(!c.classify(QuestionKind::Helmet, "헬멧이 없습니다"));
    }

    #[test]
    fn test_word_boundaries() {
        // "know"/"nothing" 中的 no 不算否定
        assert!(!KeywordClassifier::is_negative("I know, yes"));
        assert!(KeywordClassifier::is_negative("no"));
        assert!(!KeywordClassifier::classify(&KeywordClassifier, QuestionKind::Generic, "unclear"));
    }
}
