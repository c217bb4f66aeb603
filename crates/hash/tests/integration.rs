//! Integration tests for hash crate

#[cfg(test)]
mod tests {
    use fetchup_hash::*;
    use proptest::prelude::*;
    use tempfile::tempdir;
    use tokio::fs;

    #[tokio::test]
    async fn test_verify_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.txt");

        let data = b"verify this content";
        fs::write(&file_path, data).await.unwrap();

        let hash = Hash::from_data(HashAlgorithm::Sha256, data);
        assert!(verify(&file_path, &hash).await.unwrap());

        let wrong_hash = Hash::from_data(HashAlgorithm::Sha256, b"different content");
        assert!(!verify(&file_path, &wrong_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_verify_honours_algorithm_prefix() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("pkg.zip");
        fs::write(&file_path, b"zip bytes").await.unwrap();

        let expected = Hash::from_data(HashAlgorithm::Blake3, b"zip bytes").to_string();
        let actual = verify_checksum(&file_path, &expected).await.unwrap();
        assert_eq!(actual.algorithm(), HashAlgorithm::Blake3);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = digest(&dir.path().join("absent")).await.unwrap_err();
        assert_eq!(err.kind(), fetchup_errors::ErrorKind::NotFound);
    }

    #[test]
    fn test_hash_from_hex_errors() {
        assert!(Hash::from_hex("1234").is_err());
        assert!(Hash::from_hex("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(Hash::from_hex(&"zz".repeat(32)).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_digest_round_trip_and_single_byte_flip(
            data in proptest::collection::vec(any::<u8>(), 1..4096),
            index in any::<prop::sample::Index>(),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let dir = tempdir().unwrap();
                let path = dir.path().join("blob");
                fs::write(&path, &data).await.unwrap();

                let hash = digest(&path).await.unwrap();
                assert!(verify(&path, &hash).await.unwrap());

                let mut mutated = data.clone();
                let i = index.index(mutated.len());
                mutated[i] ^= 0x01;
                fs::write(&path, &mutated).await.unwrap();
                assert!(!verify(&path, &hash).await.unwrap());
            });
        }
    }
}
