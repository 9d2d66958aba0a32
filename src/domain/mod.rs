// RDF 資料模型與 port 定義

pub mod model;
pub mod ports;
