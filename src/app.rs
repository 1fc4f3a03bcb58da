//! コマンドラインの定義と各コマンドの実行。

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::analysis::{self, AnalysisOptions, DEFAULT_TOP_K};
use crate::config::{Config, DataLayout};
use crate::crawler::storage::export_by_source;
use crate::crawler::{
    DcInsideCrawler, GalleryConfig, InstizBoardConfig, InstizCrawler, PageFetcher,
    TheQooBoardConfig, TheQooCrawler, build_fetcher, end_of_day, parse_date_arg,
};
use crate::model::CrawlResult;
use crate::morph::{Reviewer, TerminalReviewer};
use crate::observability::{self, LogFormat};
use crate::pipeline::{self, StageSummary, clean, expand, intent, morph, tag};
use crate::review;
use crate::tagger::{BareunClient, BareunConfig};

/// `crawl communities` で巡回するDCInsideギャラリー（ID, 表示名）。表示名がファイル名になる。
pub const DEFAULT_GALLERIES: [(&str, &str); 6] = [
    ("football_new9", "해외축구_갤러리"),
    ("leagueoflegends6", "리그오브레전드_갤러리"),
    ("exam_new2", "수능_갤러리"),
    ("cosmetic", "향수화장품_갤러리"),
    ("entertainment", "국내연예-남자여자연예인_갤러리"),
    ("m_entertainer_new1", "남자연예인_갤러리"),
];
/// `crawl communities` で巡回するTheQoo掲示板のパス。名前は付けずパスをそのまま使う。
pub const DEFAULT_THEQOO_BOARDS: [&str; 2] = ["beauty/category/25604", "ktalk/category/1947874"];
const COMMUNITIES_MAX_PAGES: u32 = 100;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// データのルートディレクトリ（EOMI_DATA_DIR より優先）
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// コミュニティの投稿とコメントを収集して raw/ に保存する
    Crawl {
        #[command(subcommand)]
        target: CrawlTarget,
    },
    /// 01: raw/ を正規化・重複除去して preprocessed/ に書く
    Clean(FilterArgs),
    /// 02: 文に分割して形態素解析する
    Tag(FilterArgs),
    /// 03: 終結語尾で文を分割し直し、語尾と記号を抽出する
    Morph {
        #[command(flatten)]
        filter: FilterArgs,
        /// 曖昧なタグを端末で確認する
        #[arg(long)]
        interactive: bool,
    },
    /// 04: 1文1行に展開する
    Expand(FilterArgs),
    /// 05: 分析用の末尾語尾を付ける
    Intent(FilterArgs),
    /// clean から intent までを順に実行する
    Pipeline(FilterArgs),
    /// 形態素処理結果の手動レビュー
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// 語尾分布の集計とカイ二乗検定
    Analyze {
        #[command(flatten)]
        filter: FilterArgs,
        /// 반말の文だけを集計する
        #[arg(long)]
        banmal_only: bool,
        /// 検定・グラフに使う上位語尾の数
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// ファイル名にこの文字列を含むコミュニティだけを処理する
    #[arg(long)]
    pub gallery: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DateRange {
    /// この日時より古い投稿で巡回を止める（YYYY-MM-DD）
    #[arg(long, value_parser = parse_date_arg)]
    pub start_date: Option<NaiveDateTime>,
    /// この日時より新しい投稿は飛ばす（日付だけならその日の終わりまで）
    #[arg(long, value_parser = parse_date_arg)]
    pub end_date: Option<NaiveDateTime>,
}

#[derive(Subcommand, Debug)]
pub enum CrawlTarget {
    Dcinside {
        /// ギャラリーID（複数可）
        #[arg(long = "gallery", required = true)]
        galleries: Vec<String>,
        #[arg(long, default_value_t = 1)]
        start_page: u32,
        #[arg(long, default_value_t = 3)]
        max_pages: u32,
        #[command(flatten)]
        range: DateRange,
        #[arg(long)]
        no_comments: bool,
    },
    Theqoo {
        /// 掲示板のパス（例: beauty/category/25604）
        #[arg(long = "board", required = true)]
        boards: Vec<String>,
        #[arg(long, default_value_t = 1)]
        start_page: u32,
        #[arg(long, default_value_t = 1)]
        max_pages: u32,
        #[command(flatten)]
        range: DateRange,
    },
    Instiz {
        #[arg(long, default_value = "pt")]
        board: String,
        #[arg(long, default_value_t = 1)]
        start_page: u32,
        #[arg(long, default_value_t = 2)]
        max_pages: u32,
        #[arg(long)]
        no_comments: bool,
    },
    /// 既定のDCInsideギャラリーとTheQoo掲示板をまとめて収集する
    Communities {
        #[arg(long, default_value_t = COMMUNITIES_MAX_PAGES)]
        max_pages: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum ReviewAction {
    /// review/review_dataset.csv を書き出す
    Export,
    /// review/review_dataset_corrected.csv の修正を取り込む
    Import,
}

/// バイナリのエントリーポイント。
///
/// # Errors
/// 設定の読み込み、またはコマンドの実行に失敗した場合はエラーを返す。
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init("info", cli.log_format)?;
    observability::install_panic_hook();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }
    run(&config, cli.command).await
}

/// 1つのコマンドを実行する。
///
/// # Errors
/// コマンドが失敗した場合はエラーを返す。
pub async fn run(config: &Config, command: Command) -> Result<()> {
    let layout = config.layout();
    match command {
        Command::Crawl { target } => crawl(config, &layout, target).await,
        Command::Clean(filter) => report(&clean::run(&layout, filter.gallery.as_deref())?),
        Command::Tag(filter) => {
            let tagger = bareun_client(config)?;
            let summary = tag::run(
                &layout,
                &tagger,
                config.tag_max_concurrency().get(),
                filter.gallery.as_deref(),
            )
            .await?;
            report(&summary)
        }
        Command::Morph { filter, interactive } => {
            let options = morph::MorphOptions::from_config(config);
            if interactive {
                let mut reviewer = TerminalReviewer::stdio();
                let summary = {
                    let reviewer: &mut dyn Reviewer = &mut reviewer;
                    morph::run(&layout, &options, Some(reviewer), filter.gallery.as_deref())?
                };
                println!(
                    "manual review: {} corrections, {} deletions",
                    reviewer.corrections(),
                    reviewer.deletions()
                );
                report(&summary)
            } else {
                report(&morph::run(&layout, &options, None, filter.gallery.as_deref())?)
            }
        }
        Command::Expand(filter) => report(&expand::run(&layout, filter.gallery.as_deref())?),
        Command::Intent(filter) => report(&intent::run(&layout, filter.gallery.as_deref())?),
        Command::Pipeline(filter) => {
            let tagger = bareun_client(config)?;
            for summary in pipeline::run_pipeline(config, &tagger, filter.gallery.as_deref()).await? {
                report(&summary)?;
            }
            Ok(())
        }
        Command::Review { action } => review_command(config, &layout, action).await,
        Command::Analyze {
            filter,
            banmal_only,
            top_k,
        } => analyze(&layout, AnalysisOptions { banmal_only, top_k }, filter.gallery.as_deref()),
    }
}

fn bareun_client(config: &Config) -> Result<BareunClient> {
    BareunClient::new(BareunConfig::from_config(config)?)
}

#[allow(clippy::unnecessary_wraps)]
fn report(summary: &StageSummary) -> Result<()> {
    println!("{summary}");
    Ok(())
}

async fn review_command(config: &Config, layout: &DataLayout, action: ReviewAction) -> Result<()> {
    match action {
        ReviewAction::Export => {
            match review::export_for_review(layout)? {
                Some(summary) => println!(
                    "exported {} rows ({} need manual review) to {}",
                    summary.rows,
                    summary.needs_manual,
                    summary.path.display()
                ),
                None => warn!("no morph files found; run the morph stage first"),
            }
            Ok(())
        }
        ReviewAction::Import => {
            let tagger = bareun_client(config)?;
            let summary = review::import_corrections(layout, &tagger).await?;
            println!(
                "updated {} rows in {} files",
                summary.updated,
                summary.saved_files.len()
            );
            Ok(())
        }
    }
}

fn analyze(layout: &DataLayout, options: AnalysisOptions, filter: Option<&str>) -> Result<()> {
    let Some(output) = analysis::run(layout, &options, filter)? else {
        return Ok(());
    };

    for community in output.communities.values() {
        let neologisms = community
            .neologisms
            .iter()
            .map(|(ending, count)| format!("{ending}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{}: {} sentences, casual {:.1}%, neologisms {}",
            community.community,
            community.sentences,
            community.casual_ratio() * 100.0,
            neologisms
        );
    }
    for (name, result) in [
        ("endings", &output.chi_square.endings),
        ("punctuation", &output.chi_square.punctuation),
    ] {
        match result {
            Some(result) => println!(
                "chi-square ({name}): χ²={:.3}, dof={}, p={:.4}, Cramér's V={:.3}, expected<5 cells={}",
                result.statistic, result.dof, result.p_value, result.cramers_v, result.low_expected_cells
            ),
            None => println!("chi-square ({name}): not enough data"),
        }
    }
    for path in &output.files {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn with_range<T>(mut value: T, range: &DateRange, set: impl FnOnce(&mut T, Option<NaiveDateTime>, Option<NaiveDateTime>)) -> T {
    set(&mut value, range.start_date, range.end_date.map(end_of_day));
    value
}

async fn crawl(config: &Config, layout: &DataLayout, target: CrawlTarget) -> Result<()> {
    let fetcher = build_fetcher(config).await?;
    let outcome = crawl_with(fetcher.as_ref(), layout, target).await;
    if let Err(error) = fetcher.close().await {
        warn!(error = %format!("{error:#}"), "failed to close fetcher");
    }
    outcome
}

async fn crawl_with(fetcher: &dyn PageFetcher, layout: &DataLayout, target: CrawlTarget) -> Result<()> {
    match target {
        CrawlTarget::Dcinside {
            galleries,
            start_page,
            max_pages,
            range,
            no_comments,
        } => {
            let crawler = DcInsideCrawler::new(fetcher);
            for gallery in galleries {
                let config = with_range(GalleryConfig::new(gallery), &range, |g, start, end| {
                    g.start_page = start_page;
                    g.max_pages = max_pages;
                    g.include_comments = !no_comments;
                    g.start_date = start;
                    g.end_date = end;
                });
                save(layout, config.label(), crawler.crawl(std::slice::from_ref(&config)).await)?;
            }
        }
        CrawlTarget::Theqoo {
            boards,
            start_page,
            max_pages,
            range,
        } => {
            let crawler = TheQooCrawler::new(fetcher);
            for board in boards {
                let config = with_range(TheQooBoardConfig::new(board), &range, |b, start, end| {
                    b.start_page = start_page;
                    b.max_pages = max_pages;
                    b.start_date = start;
                    b.end_date = end;
                });
                save(layout, config.label(), crawler.crawl(std::slice::from_ref(&config)).await)?;
            }
        }
        CrawlTarget::Instiz {
            board,
            start_page,
            max_pages,
            no_comments,
        } => {
            let mut config = InstizBoardConfig::new(board).with_max_pages(max_pages);
            config.start_page = start_page;
            config.include_comments = !no_comments;
            let label = config.board.clone();
            save(layout, &label, InstizCrawler::new(fetcher).crawl(&[config]).await)?;
        }
        CrawlTarget::Communities { max_pages } => {
            let dcinside = DcInsideCrawler::new(fetcher);
            for config in default_gallery_configs(max_pages) {
                save(layout, config.label(), dcinside.crawl(std::slice::from_ref(&config)).await)?;
            }
            let theqoo = TheQooCrawler::new(fetcher);
            for config in default_theqoo_configs(max_pages) {
                save(layout, config.label(), theqoo.crawl(std::slice::from_ref(&config)).await)?;
            }
        }
    }
    Ok(())
}

fn default_gallery_configs(max_pages: u32) -> Vec<GalleryConfig> {
    DEFAULT_GALLERIES
        .iter()
        .map(|&(id, name)| GalleryConfig::new(id).with_name(name).with_max_pages(max_pages))
        .collect()
}

fn default_theqoo_configs(max_pages: u32) -> Vec<TheQooBoardConfig> {
    DEFAULT_THEQOO_BOARDS
        .iter()
        .map(|&path| TheQooBoardConfig::new(path).with_max_pages(max_pages))
        .collect()
}

/// 収集結果をすぐに書き出す（長い巡回の途中で失敗しても取得済みの分は残す）。
fn save(layout: &DataLayout, label: &str, result: CrawlResult) -> Result<()> {
    if result.posts.is_empty() {
        warn!(source = label, "no posts collected");
        return Ok(());
    }
    let exported = export_by_source(&layout.raw_dir(), &result.posts, &result.comments)?;
    for (prefix, paths) in &exported {
        info!(
            source = label,
            prefix = %prefix,
            posts = ?paths.posts_csv.as_ref().map(|p| p.display().to_string()),
            comments = ?paths.comments_csv.as_ref().map(|p| p.display().to_string()),
            "crawl exported"
        );
    }
    println!(
        "{label}: {} posts, {} comments",
        result.posts.len(),
        result.comments.len()
    );
    Ok(())
}
