use image::{DynamicImage, GenericImageView};
use img_hash::{HashAlg, HasherConfig, ImageHash};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::error::DetectorFault;

/// 图片的密码学摘要 (SHA256, 小写十六进制)
///
/// 同时充当“图片能否解析为可读字节”的判定：读不到就是 `ImageNotFound`。
/// 摘要会写进每一条检测记录，事后可以核对“审的到底是哪张图”。
pub fn image_sha256(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// 解码图片。非图片文件在这里报错，由调用方当作检测器故障处理。
pub fn decode(path: &Path) -> Result<DynamicImage, DetectorFault> {
    image::open(path).map_err(|e| DetectorFault::Image(e.to_string()))
}

/// 梯度感知哈希 (pHash)
///
/// 图片经过压缩、缩放后 SHA256 会完全改变，但感知哈希依然相近，
/// 参考哈希检测器靠它做近邻匹配。
pub fn perceptual_hash(img: &DynamicImage, hash_size: u32) -> ImageHash {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(hash_size, hash_size)
        .to_hasher();

    hasher.hash_image(img)
}

/// 哈希的总位数，用于把汉明距离换算成置信度
pub fn hash_bits(hash_size: u32) -> Option<u32> {
    hash_size.checked_mul(hash_size)
}

pub fn dimensions(img: &DynamicImage) -> (u32, u32) {
    img.dimensions()
}
