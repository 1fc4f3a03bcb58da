/// クローラー間で共通の投稿・コメントモデル。
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 任意の付加情報（閲覧数、推薦数など）。
pub type Meta = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub site: String,
    pub source_id: String,
    pub author: Option<String>,
    pub content: String,
    /// 韓国時間の壁時計時刻
    pub posted_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub site: String,
    /// ギャラリー・掲示板の表示名
    pub gallery: String,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub author: Option<String>,
    pub posted_at: Option<NaiveDateTime>,
    pub comment_count: u32,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// 1回のクロールで集めた投稿とコメント。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlResult {
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
}

impl CrawlResult {
    pub fn extend(&mut self, other: CrawlResult) {
        self.posts.extend(other.posts);
        self.comments.extend(other.comments);
    }
}

/// メタ情報に値を入れる。`None` は null として残す。
pub(crate) fn insert_opt<T: Into<Value>>(meta: &mut Meta, key: &str, value: Option<T>) {
    meta.insert(key.to_string(), value.map_or(Value::Null, Into::into));
}
