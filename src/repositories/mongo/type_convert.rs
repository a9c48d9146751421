use std::ops::Bound;

use mongodb::bson::{doc, Document};

use super::{
    FollowQuery, MongoCommentModel, MongoFollowModel, MongoPostModel, MongoStatsModel,
    MongoUserModel, PostQuery,
};
use crate::entities::{
    AuthorId, Comment, EdgeId, FollowEdge, Post, PostId, PostStatus, User, UserStats,
};

pub(super) fn status_str(status: PostStatus) -> &'static str {
    match status {
        PostStatus::Active => "active",
        PostStatus::Deleted => "deleted",
    }
}

fn status_from(s: &str) -> PostStatus {
    match s {
        "active" => PostStatus::Active,
        "deleted" => PostStatus::Deleted,
        other => unreachable!("unexpected status tag: {}", other),
    }
}

impl From<PostQuery> for Document {
    fn from(
        PostQuery {
            status,
            author_in,
            author_name,
            limit: _,
        }: PostQuery,
    ) -> Self {
        let mut query = doc! {};

        if let Some(s) = status {
            query.insert("status", status_str(s));
        }

        if let Some(mut set_raw) = author_in {
            let set = set_raw.drain().map(|i| i.to_string()).collect::<Vec<_>>();
            // an empty set stays as `$in: []`, matching nothing
            query.insert("author_id", doc! { "$in": set });
        }

        if let Some((g, l)) = author_name {
            let mut range = doc! {};

            match g {
                Bound::Unbounded => (),
                Bound::Included(s) => {
                    range.insert("$gte", s);
                }
                Bound::Excluded(s) => {
                    range.insert("$gt", s);
                }
            }

            match l {
                Bound::Unbounded => (),
                Bound::Included(s) => {
                    range.insert("$lte", s);
                }
                Bound::Excluded(s) => {
                    range.insert("$lt", s);
                }
            }

            if !range.is_empty() {
                query.insert("author", range);
            }
        }

        query
    }
}

impl From<FollowQuery> for Document {
    fn from(FollowQuery { author, followed_by }: FollowQuery) -> Self {
        let mut query = doc! {};

        if let Some(a) = author {
            query.insert("author", a.to_string());
        }

        if let Some(f) = followed_by {
            query.insert("followed_by", f.to_string());
        }

        query
    }
}

impl From<MongoUserModel> for User {
    fn from(MongoUserModel { id, name, image }: MongoUserModel) -> User {
        User {
            id: AuthorId::new(id),
            name,
            image,
        }
    }
}
impl From<User> for MongoUserModel {
    fn from(User { id, name, image }: User) -> Self {
        MongoUserModel {
            id: id.to_string(),
            name,
            image,
        }
    }
}

impl From<MongoPostModel> for Post {
    fn from(
        MongoPostModel {
            id,
            title,
            content,
            author,
            author_id,
            date,
            mut likes,
            comments,
            status,
        }: MongoPostModel,
    ) -> Self {
        Post {
            id: PostId(id.parse().unwrap()),
            title,
            content,
            author,
            author_id: AuthorId::new(author_id),
            date: date.parse().unwrap(),
            likes: likes.drain().map(AuthorId::new).collect(),
            comments: comments.into_iter().map(|m| m.into()).collect(),
            status: status_from(&status),
        }
    }
}
impl From<Post> for MongoPostModel {
    fn from(
        Post {
            id,
            title,
            content,
            author,
            author_id,
            date,
            mut likes,
            comments,
            status,
        }: Post,
    ) -> Self {
        MongoPostModel {
            id: id.to_string(),
            title,
            content,
            author,
            author_id: author_id.to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            likes: likes.drain().map(|a| a.to_string()).collect(),
            comments: comments.into_iter().map(|c| c.into()).collect(),
            status: status_str(status).to_owned(),
        }
    }
}

impl From<MongoCommentModel> for Comment {
    fn from(MongoCommentModel { text, author_id }: MongoCommentModel) -> Self {
        Comment {
            text,
            author_id: AuthorId::new(author_id),
        }
    }
}
impl From<Comment> for MongoCommentModel {
    fn from(Comment { text, author_id }: Comment) -> Self {
        MongoCommentModel {
            text,
            author_id: author_id.to_string(),
        }
    }
}

impl From<MongoFollowModel> for FollowEdge {
    fn from(
        MongoFollowModel {
            id,
            author,
            followed_by,
            followed_at,
        }: MongoFollowModel,
    ) -> Self {
        FollowEdge {
            id: EdgeId(id.parse().unwrap()),
            author: AuthorId::new(author),
            followed_by: AuthorId::new(followed_by),
            followed_at: followed_at.parse().unwrap(),
        }
    }
}
impl From<FollowEdge> for MongoFollowModel {
    fn from(
        FollowEdge {
            id,
            author,
            followed_by,
            followed_at,
        }: FollowEdge,
    ) -> Self {
        MongoFollowModel {
            id: id.to_string(),
            author: author.to_string(),
            followed_by: followed_by.to_string(),
            followed_at: followed_at.to_rfc3339(),
        }
    }
}

impl From<MongoStatsModel> for UserStats {
    fn from(
        MongoStatsModel {
            author,
            followers,
            following,
            follower_count,
            following_count,
        }: MongoStatsModel,
    ) -> Self {
        UserStats {
            author: AuthorId::new(author),
            followers: followers.into_iter().map(AuthorId::new).collect(),
            following: following.into_iter().map(AuthorId::new).collect(),
            follower_count: follower_count as u32,
            following_count: following_count as u32,
        }
    }
}
impl From<UserStats> for MongoStatsModel {
    fn from(
        UserStats {
            author,
            followers,
            following,
            follower_count,
            following_count,
        }: UserStats,
    ) -> Self {
        MongoStatsModel {
            author: author.to_string(),
            followers: followers.into_iter().map(|a| a.to_string()).collect(),
            following: following.into_iter().map(|a| a.to_string()).collect(),
            follower_count: follower_count as i64,
            following_count: following_count as i64,
        }
    }
}

#[test]
fn post_query_builds_range_and_membership() {
    let mut authors = std::collections::HashSet::new();
    authors.insert(AuthorId::new("a@example.com"));

    let query = PostQuery {
        status: Some(PostStatus::Active),
        author_in: Some(authors),
        author_name: Some((
            Bound::Included("Al".into()),
            Bound::Included("Al\u{f8ff}".into()),
        )),
        limit: Some(5),
    };

    let query_doc: Document = query.into();

    assert_eq!(query_doc.get_str("status").unwrap(), "active");

    assert_eq!(
        query_doc.get_document("author").unwrap(),
        &doc! { "$gte": "Al", "$lte": "Al\u{f8ff}" }
    );

    assert_eq!(
        query_doc
            .get_document("author_id")
            .unwrap()
            .get_array("$in")
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn empty_membership_matches_nothing() {
    let query = PostQuery {
        author_in: Some(Default::default()),
        ..PostQuery::default()
    };

    let query_doc: Document = query.into();

    assert_eq!(
        query_doc.get_document("author_id").unwrap(),
        &doc! { "$in": [] }
    );
}
