use std::fs;

use anyhow::Result;
use async_trait::async_trait;

use eomi::analysis::{self, AnalysisOptions};
use eomi::config::DataLayout;
use eomi::pipeline::intent::IntentRow;
use eomi::pipeline::morph::MorphOptions;
use eomi::pipeline::{clean, expand, intent, morph, tag};
use eomi::review;
use eomi::tagger::{MorphTagger, Morpheme};
use eomi::util::dataset::read_records;

/// 空白区切りの語ごとに、末尾が 다/긔/요 なら語幹 NNG + 語尾 EF、末尾の句読点は SF にする。
struct WordTagger;

#[async_trait]
impl MorphTagger for WordTagger {
    async fn analyze(&self, text: &str) -> Result<Vec<Morpheme>> {
        let mut tokens = Vec::new();
        for word in text.split_whitespace() {
            let core = word.trim_end_matches(['.', '!', '?']);
            let marks = &word[core.len()..];

            match core.chars().last() {
                Some(last @ ('다' | '긔' | '요')) => {
                    let stem = &core[..core.len() - last.len_utf8()];
                    if !stem.is_empty() {
                        tokens.push(Morpheme::new(stem, "NNG", 0.99));
                    }
                    tokens.push(Morpheme::new(last.to_string(), "EF", 0.99));
                }
                Some(_) => tokens.push(Morpheme::new(core, "NNG", 0.99)),
                None => {}
            }
            for mark in marks.chars() {
                tokens.push(Morpheme::new(mark.to_string(), "SF", 0.99));
            }
        }
        Ok(tokens)
    }
}

const RAW_POSTS: &str = "\
site,gallery,title,content,posted_at
dcinside,alpha,첫글이다,진짜 좋다. 너무 웃기다!,2024-05-01T10:00:00
dcinside,alpha,질문,이거 맞긔?,2024-05-01T11:00:00
dcinside,beta,안녕하세요,반가워요!,2024-05-02T09:00:00
dcinside,beta,공지다,그렇다,2024-05-02T09:30:00
dcinside,beta,공지다,그렇다,2024-05-02T09:31:00
";

#[tokio::test]
async fn raw_posts_flow_through_every_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = DataLayout::new(dir.path());
    fs::create_dir_all(layout.raw_dir()).expect("raw dir");
    fs::write(layout.raw_dir().join("dcinside_posts.csv"), RAW_POSTS).expect("raw csv");
    fs::write(layout.raw_dir().join("notes.csv"), "memo\nignored\n").expect("unrelated csv");

    let cleaned = clean::run(&layout, None).expect("clean");
    assert_eq!(cleaned.rows_in, 5);
    assert_eq!(cleaned.rows_out, 4);

    let tagged = tag::run(&layout, &WordTagger, 4, None).await.expect("tag");
    assert_eq!(tagged.files, 2);

    let morphed = morph::run(&layout, &MorphOptions::default(), None, None).expect("morph");
    assert_eq!(morphed.rows_out, 4);
    assert!(
        fs::read_dir(layout.morph_dir())
            .expect("morph dir")
            .filter_map(Result::ok)
            .all(|entry| !entry.file_name().to_string_lossy().ends_with(".partial.csv"))
    );

    expand::run(&layout, None).expect("expand");
    let intents = intent::run(&layout, None).expect("intent");
    assert_eq!(intents.files, 2);

    let alpha: Vec<IntentRow> =
        read_records(&layout.intent_dir().join("intent_dcinside_alpha.csv")).expect("alpha");
    assert_eq!(alpha.len(), 4);
    let neologism = alpha
        .iter()
        .find(|row| row.sentence.contains("맞긔"))
        .expect("neologism sentence");
    assert_eq!(neologism.punctuation_marks(), ["?"]);
    let real: Vec<String> = neologism
        .real_ending_morphemes()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(real, ["긔"]);

    let output = analysis::run(&layout, &AnalysisOptions::default(), None)
        .expect("analysis")
        .expect("intent rows exist");
    let alpha_stats = &output.communities["dcinside_alpha"];
    let beta_stats = &output.communities["dcinside_beta"];
    assert_eq!(alpha_stats.sentences, 4);
    assert_eq!(alpha_stats.casual_sentences, 4);
    assert_eq!(alpha_stats.neologisms["긔"], 1);
    assert_eq!(beta_stats.sentences, 4);
    assert_eq!(beta_stats.casual_sentences, 2);
    assert_eq!(beta_stats.endings["요"], 2);

    let endings = output.chi_square.endings.as_ref().expect("ending test");
    assert_eq!(endings.dof, 2);
    assert!(endings.p_value > 0.0 && endings.p_value <= 1.0);
    for file in &output.files {
        assert!(file.exists());
    }

    let casual = analysis::run(
        &layout,
        &AnalysisOptions {
            banmal_only: true,
            top_k: 10,
        },
        Some("beta"),
    )
    .expect("analysis")
    .expect("casual rows exist");
    assert_eq!(casual.communities["dcinside_beta"].sentences, 2);
    assert!(casual.chi_square.endings.is_none());

    let exported = review::export_for_review(&layout)
        .expect("review export")
        .expect("morph files exist");
    assert_eq!(exported.rows, 4);
    assert_eq!(exported.needs_manual, 0);
}
