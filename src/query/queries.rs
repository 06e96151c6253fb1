/// 세션 토큰 조회
pub const GET_SESSION_TOKEN: &str = "SELECT token FROM sessions WHERE user_id = $1";

/// 세션 등록 (재로그인 시 토큰 갱신)
pub const UPSERT_SESSION: &str = r#"
    INSERT INTO sessions (user_id, token, last_seen)
    VALUES ($1, $2, NOW())
    ON CONFLICT (user_id) DO UPDATE SET token = EXCLUDED.token, last_seen = NOW()
"#;

/// 하트비트 수신 시각 갱신
pub const TOUCH_SESSION: &str = "UPDATE sessions SET last_seen = NOW() WHERE user_id = $1";

/// 입찰 이력 조회
pub const GET_BID_HISTORY: &str = r#"
    SELECT id, auction_id, bidder_id, amount, quantity, is_proxy, status, created_at
    FROM bids
    WHERE auction_id = $1
    ORDER BY created_at DESC
"#;

/// 진행 중 경매 목록 조회
pub const GET_ACTIVE_AUCTIONS: &str = r#"
    SELECT id, product_id, seller_id, auction_type, start_price, current_bid, bid_increment,
           reserve_price, start_time, end_time, extension_count, max_extensions,
           extension_window_secs, status, winner_id, final_price, created_at
    FROM auctions
    WHERE status = 'ACTIVE'
    ORDER BY end_time ASC
"#;
