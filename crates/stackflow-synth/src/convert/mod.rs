//! リソース種類ごとの変換
//!
//! 各関数はブループリントの1リソースを受け取り、対応する CloudFormation
//! リソース（と付随する子リソース・出力）を [`Synthesizer`](crate::synth::Synthesizer) に登録します。

pub(crate) mod api;
pub(crate) mod compute;
pub(crate) mod data;
pub(crate) mod iam;
pub(crate) mod identity;
