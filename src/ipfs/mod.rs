// 内容寻址存储（IPFS）模块
//
// - direct: 单请求直传，30MB 上限
// - chunked: 分片上传 + 状态轮询

pub mod chunked;
pub mod direct;
pub mod types;

pub use chunked::{md5_hex, ChunkedUploadApi, ChunkedUploadSession, HttpChunkedApi, PollConfig};
pub use direct::{DirectIpfsClient, MAX_DIRECT_UPLOAD_SIZE};
pub use types::{DirectUploadResponse, PinMeUploadResult};
