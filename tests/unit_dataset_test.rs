use isubench::core::dataset::{DataSet, random_alphabet_string};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_fixtures(dir: &Path) {
    fs::write(
        dir.join("user.tsv"),
        "Alice A\talice@example.com\nBob B\tbob@example.com\nCarol C\tcarol@example.com\n",
    )
    .unwrap();
    fs::write(dir.join("default.png"), b"default-image-bytes").unwrap();

    fs::create_dir(dir.join("avatar")).unwrap();
    fs::write(dir.join("avatar/one.png"), b"one-image-bytes").unwrap();
    fs::write(dir.join("avatar/two.jpg"), b"two-image-bytes").unwrap();
    fs::write(dir.join("avatar/notes.txt"), b"not an image").unwrap();

    fs::create_dir(dir.join("large-avatar")).unwrap();
    fs::write(dir.join("large-avatar/big.png"), vec![0u8; 1024 * 1024 + 1]).unwrap();

    fs::create_dir(dir.join("message")).unwrap();
    fs::write(dir.join("message/corpus.txt"), "hello\u{3000}world \nsecond line\n").unwrap();
}

#[tokio::test]
async fn test_load_builds_the_complete_dataset() {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());
    let dataset = DataSet::load(dir.path()).unwrap();

    assert_eq!(dataset.users.len(), 3);
    assert!(dataset.new_users.is_empty());

    let alice = &dataset.users[0];
    assert_eq!(alice.name, "alice");
    assert_eq!(alice.password, "aliceecila");
    assert_eq!(alice.display_name, "Alice A");
    assert!(alice.avatar.lock().is_some());

    // Ideographic spaces are stripped and lines trimmed.
    assert_eq!(dataset.texts, vec!["helloworld", "second line"]);

    // Two fixture images plus one derived variant each.
    assert_eq!(dataset.avatars.len(), 4);
    assert_eq!(dataset.large_avatars.len(), 1);
    assert_eq!(dataset.default_avatar.file_name, "default.png");

    let one = &dataset.avatars[0];
    assert_eq!(one.file_name, "one.png");
    assert_eq!(one.md5, format!("{:x}", md5::compute(b"one-image-bytes")));
    assert_eq!(one.sha1.len(), 40);

    assert_eq!(dataset.channels.len(), 10);
    assert_eq!(dataset.channels[0].id, 1);

    assert_eq!(dataset.messages.len(), 10000);
    assert!(
        dataset
            .messages
            .iter()
            .all(|m| (1..=10).contains(&m.channel_id))
    );
    assert_eq!(dataset.messages[0].user_name, "alice");
    assert_eq!(dataset.messages[1].user_name, "bob");
}

#[tokio::test]
async fn test_load_is_deterministic() {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());

    let a = DataSet::load(dir.path()).unwrap();
    let b = DataSet::load(dir.path()).unwrap();

    assert_eq!(a.messages[0].content, b.messages[0].content);
    assert_eq!(a.messages[9999].channel_id, b.messages[9999].channel_id);

    let avatar_a = a.users[1].avatar.lock().clone().unwrap();
    let avatar_b = b.users[1].avatar.lock().clone().unwrap();
    assert_eq!(avatar_a.md5, avatar_b.md5);
}

#[tokio::test]
async fn test_avatar_variants_differ_when_the_pattern_matches() {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());
    fs::write(
        dir.path().join("avatar/patterned.png"),
        b"prefix-e4nwaAsqAt5od9-suffix",
    )
    .unwrap();

    let dataset = DataSet::load(dir.path()).unwrap();
    let original = dataset
        .avatars
        .iter()
        .find(|a| a.file_name == "patterned.png" && a.bytes.starts_with(b"prefix-e4nwaAsqAt5od9"))
        .expect("the fixture image itself");
    let variant = dataset
        .avatars
        .iter()
        .find(|a| a.file_name == "patterned.png" && a.md5 != original.md5)
        .expect("a rewritten variant");
    assert_eq!(variant.bytes.len(), original.bytes.len());
}

#[tokio::test]
async fn test_load_rejects_oversized_avatars() {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());
    fs::write(dir.path().join("avatar/huge.png"), vec![0u8; 1024 * 1024 + 1]).unwrap();

    assert!(DataSet::load(dir.path()).is_err());
}

#[tokio::test]
async fn test_load_rejects_undersized_large_avatars() {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());
    fs::write(dir.path().join("large-avatar/tiny.png"), b"tiny").unwrap();

    assert!(DataSet::load(dir.path()).is_err());
}

#[tokio::test]
async fn test_load_fails_without_fixtures() {
    let dir = TempDir::new().unwrap();
    assert!(DataSet::load(dir.path()).is_err());
}

#[tokio::test]
async fn test_random_alphabet_string() {
    let s = random_alphabet_string(32);
    assert_eq!(s.len(), 32);
    assert!(s.chars().all(|c| c.is_ascii_alphabetic()));
}

#[tokio::test]
async fn test_random_text_concatenates_corpus_entries() {
    let dir = TempDir::new().unwrap();
    write_fixtures(dir.path());
    let dataset = DataSet::load(dir.path()).unwrap();

    for _ in 0..16 {
        let text = dataset.random_text();
        assert!(!text.is_empty());
        // Three entries drawn from a two-entry corpus.
        let a = "helloworld".len();
        let b = "second line".len();
        let possible = [3 * a, 2 * a + b, a + 2 * b, 3 * b];
        assert!(possible.contains(&text.len()));
    }
}
