/// 视觉问答 (VQA)
///
/// 独立工作线程, 不阻塞分析主循环
/// - Oracle:     问答模型接口 + 远程HTTP实现
/// - Classifier: 自由文本回答 → 布尔
/// - Cache:      按槽位的LRU结果缓存
/// - Worker:     有界队列消费者
pub mod cache;
pub mod classifier;
pub mod oracle;
pub mod worker;

pub use cache::LruCache;
pub use classifier::{AnswerClassifier, KeywordClassifier, QuestionKind};
pub use oracle::{limit_side, RemoteVqaOracle, VqaOracle};
pub use worker::{vqa_channel, VqaHandle, VqaJob, VqaQueue, VqaResult, VqaWorker};
