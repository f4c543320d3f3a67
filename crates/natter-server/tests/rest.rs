mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::test_app;

#[tokio::test]
async fn health_is_public() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn signup_signin_me() {
    let app = test_app();
    let ann = app.user("ann").await;

    let (status, me) = app.get("/users/me", &ann.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], ann.id.as_str());
    assert_eq!(me["username"], "ann");
    assert_eq!(me["name"], "ChatApp");
    assert!(me.get("password").is_none());

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({
                "username": "ann",
                "email": "other@example.com",
                "password": "long enough",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Username already taken");

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({"username": "bo", "email": "bo@example.com", "password": "long enough"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/signup",
            None,
            Some(json!({"username": "bob", "email": "bob@example.com", "password": "short"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/signin",
            None,
            Some(json!({"email": "ann@example.com", "password": "wrong password"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid email or password");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = test_app();

    let (status, body) = app.call(Method::GET, "/chats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing bearer token");

    let (status, _) = app.get("/chats", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn friend_request_lifecycle() {
    let app = test_app();
    let (ann, bob, cy) = (app.user("ann").await, app.user("bob").await, app.user("cy").await);

    let (status, request) = app
        .post("/friends/requests", &ann.token, json!({"toUserId": bob.id}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(request["status"], "pending");
    assert_eq!(request["from"]["username"], "ann");
    let request_id = request["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .post("/friends/requests", &bob.token, json!({"toUserId": ann.id}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post("/friends/requests", &ann.token, json!({"toUserId": ann.id}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listed) = app.get("/friends/requests", &bob.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let accept = format!("/friends/requests/{}/accept", request_id);
    let (status, _) = app.post(&accept, &cy.token, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.post(&accept, &bob.token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Friend request accepted");

    let (status, _) = app.post(&accept, &bob.token, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, of_ann) = app.get("/friends", &ann.token).await;
    let (_, of_bob) = app.get("/friends", &bob.token).await;
    assert_eq!(of_ann[0]["id"], bob.id.as_str());
    assert_eq!(of_bob[0]["id"], ann.id.as_str());

    let (status, _) = app
        .post("/friends/requests/missing/reject", &bob.token, json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn direct_chat_message_flow() {
    let app = test_app();
    let (ann, bob, cy) = (app.user("ann").await, app.user("bob").await, app.user("cy").await);
    let chat_id = app.direct_chat(&ann, &bob).await;
    let messages = format!("/chats/{}/messages", chat_id);

    let (status, chat) = app.get(&format!("/chats/{}", chat_id), &bob.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chat["type"], "direct");
    assert_eq!(chat["participants"].as_array().unwrap().len(), 2);

    let (status, body) = app.get(&format!("/chats/{}", chat_id), &cy.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Chat not found");

    let (status, first) = app.post(&messages, &ann.token, json!({"content": "hi"})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["readBy"], json!([ann.id]));
    assert_eq!(first["type"], "text");

    let (status, second) = app
        .post(&messages, &bob.token, json!({"content": "hey", "type": "text"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.post(&messages, &ann.token, json!({"content": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "content is required");

    let (status, _) = app.post(&messages, &cy.token, json!({"content": "let me in"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = app.get(&format!("{}?limit=1", messages), &ann.token).await;
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert_eq!(page[0]["id"], second["id"]);

    let cursor = page[0]["createdAt"].as_str().unwrap().replace('+', "%2B");
    let (_, older) = app
        .get(&format!("{}?limit=1&before={}", messages, cursor), &ann.token)
        .await;
    assert_eq!(older.as_array().unwrap().len(), 1);
    assert_eq!(older[0]["id"], first["id"]);

    let (status, _) = app
        .get(&format!("{}?before=yesterday", messages), &ann.token)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let read = format!("{}/{}/read", messages, first["id"].as_str().unwrap());
    let (status, _) = app.post(&read, &bob.token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.post(&read, &bob.token, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, all) = app.get(&messages, &ann.token).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
    assert_eq!(all[1]["readBy"], json!([ann.id, bob.id]));

    let (_, chats) = app.get("/chats", &bob.token).await;
    assert_eq!(chats[0]["lastMessage"]["id"], second["id"]);
    assert_eq!(chats[0]["lastMessageAt"], second["createdAt"]);
}

#[tokio::test]
async fn chat_creation_validated() {
    let app = test_app();
    let ann = app.user("ann").await;

    let (status, _) = app
        .post("/chats", &ann.token, json!({"type": "channel", "participantIds": ["x"]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/chats", &ann.token, json!({"type": "direct", "participantId": ann.id}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/chats", &ann.token, json!({"type": "group", "participantIds": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/chats", &ann.token, json!({"type": "direct", "participantId": "ghost"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_chat_update() {
    let app = test_app();
    let (ann, bob, cy) = (app.user("ann").await, app.user("bob").await, app.user("cy").await);

    let (status, chat) = app
        .post(
            "/chats",
            &ann.token,
            json!({"type": "group", "participantIds": [bob.id, bob.id], "name": "crew"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(chat["name"], "crew");
    assert_eq!(chat["participants"].as_array().unwrap().len(), 2);
    let path = format!("/chats/{}", chat["id"].as_str().unwrap());

    let (status, updated) = app
        .call(
            Method::PATCH,
            &path,
            Some(&bob.token),
            Some(json!({"name": "crew 2", "addParticipants": [cy.id]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "crew 2");
    assert_eq!(updated["participants"].as_array().unwrap().len(), 3);

    let (status, _) = app.get(&path, &cy.token).await;
    assert_eq!(status, StatusCode::OK);

    let (status, updated) = app
        .call(
            Method::PATCH,
            &path,
            Some(&ann.token),
            Some(json!({"removeParticipants": [cy.id]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["participants"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .call(Method::PATCH, &path, Some(&cy.token), Some(json!({"name": "mine"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
