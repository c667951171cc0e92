//! Encoder adapters, the BiLSTM slot encoder, the dual-head model and its loss.

pub mod bilstm;
pub mod encoder;
pub mod joint;
pub mod loss;

pub use bilstm::BiLstm;
pub use encoder::{BertEncoder, EmbeddingEncoder, EncoderAdapter, EncoderOutput};
pub use joint::{HeadConfig, JointModel, JointOutput};
pub use loss::{bce_with_pos_weight, JointLoss, LossWeights};
