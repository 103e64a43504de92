//! Lua scripts executed server-side so each operation is atomic even under
//! concurrent callers across processes.

/// `KEYS[1]` = string key, `KEYS[2]` = hash key, `ARGV[1]` = value,
/// `ARGV[2]` = ttl in ms (0 = no expiry).
///
/// Sets the string key only if neither representation already exists.
/// Returns 1 if newly set, 0 if a value was already present.
pub const CHECK_AND_SET: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 or redis.call('HEXISTS', KEYS[2], 'v') == 1 then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1])
if tonumber(ARGV[2]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 1
";

/// `KEYS[1]` = hash key, `ARGV[1]` = expected version, `ARGV[2]` = new value,
/// `ARGV[3]` = ttl in ms (0 = no expiry).
///
/// Returns `{1, new_version}` on success, `{0, current_version, current_value}`
/// on conflict (`current_value` is `false` if the key does not exist).
pub const COMPARE_AND_SWAP: &str = r"
local cur_ver = redis.call('HGET', KEYS[1], 'ver')
local ver_num = 0
if cur_ver then ver_num = tonumber(cur_ver) end
local expected = tonumber(ARGV[1])

if ver_num ~= expected then
  local cur_val = redis.call('HGET', KEYS[1], 'v')
  return {0, ver_num, cur_val}
end

local new_ver = ver_num + 1
redis.call('HSET', KEYS[1], 'v', ARGV[2], 'ver', new_ver)
if tonumber(ARGV[3]) > 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
end
return {1, new_ver}
";

/// `KEYS[1]` = lock key, `ARGV[1]` = owner token, `ARGV[2]` = ttl in ms.
/// Returns 1 if acquired, 0 if already held by another owner.
pub const LOCK_ACQUIRE: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
  return 1
end
return 0
";

/// `KEYS[1]` = lock key, `ARGV[1]` = owner token, `ARGV[2]` = new ttl in ms.
/// Returns 1 if extended, 0 if not held by this owner.
pub const LOCK_EXTEND: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  return 1
end
return 0
";

/// `KEYS[1]` = lock key, `ARGV[1]` = owner token.
/// Returns 1 if released, 0 if not held by this owner.
pub const LOCK_RELEASE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
";
