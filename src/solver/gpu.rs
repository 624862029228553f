//! wgpu offload backend.
//!
//! The matrix buffers are uploaded once at construction (the matrix is
//! immutable for the whole solve); the iteration vectors x/r/p/q stay
//! resident on the device. Per iteration only the two reduction results
//! cross back to the host, plus the final x at the end.

pub mod context;

use std::borrow::Cow;
use std::time::{Duration, Instant};

use wgpu::util::DeviceExt;

use crate::error::{Error, Result};
use crate::solver::cg::BREAKDOWN_TOL;
use crate::solver::ellpack::EllMatrix;
use crate::solver::{SolverOptions, SolverStats, Termination};
use context::GpuContext;

const WORKGROUP_SIZE: u32 = 64;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    n: u32,
    max_nnz: u32,
    num_groups: u32,
    padding: u32,
}

pub struct GpuSolver {
    context: GpuContext,
    n: usize,
    num_groups: u32,

    b_x: wgpu::Buffer,
    b_p: wgpu::Buffer,
    b_rhs: wgpu::Buffer,
    b_scalars: wgpu::Buffer,
    b_partial: wgpu::Buffer,
    b_staging_partial: wgpu::Buffer,
    b_staging_x: wgpu::Buffer,

    bg_matrix: wgpu::BindGroup,
    bg_state: wgpu::BindGroup,
    bg_dot_p_q: wgpu::BindGroup,
    bg_dot_r_r: wgpu::BindGroup,

    pipeline_spmv: wgpu::ComputePipeline,
    pipeline_init_r_p: wgpu::ComputePipeline,
    pipeline_update_x_r: wgpu::ComputePipeline,
    pipeline_update_p: wgpu::ComputePipeline,
    pipeline_dot: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuSolver {
    pub async fn new(a: &EllMatrix) -> Result<Self> {
        if a.n > u32::MAX as usize || a.max_nnz > u32::MAX as usize {
            return Err(Error::Gpu("matrix too large for u32 indexing".into()));
        }

        let context = GpuContext::new().await?;
        let device = &context.device;

        let n = a.n;
        let num_groups = (n as u32).div_ceil(WORKGROUP_SIZE);

        // Matrix upload, once. Indices and lengths go over as u32.
        let indices: Vec<u32> = a.indices.iter().map(|&i| i as u32).collect();
        let lengths: Vec<u32> = a.length.iter().map(|&l| l as u32).collect();

        let b_data = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matrix Data"),
            contents: bytemuck::cast_slice(&a.data),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let b_indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matrix Indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let b_length = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Matrix Lengths"),
            contents: bytemuck::cast_slice(&lengths),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let params = Params {
            n: n as u32,
            max_nnz: a.max_nnz as u32,
            num_groups,
            padding: 0,
        };
        let b_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let vec_size = (n as u64) * 8;
        let state_buffer = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: vec_size,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let b_x = state_buffer("x");
        let b_r = state_buffer("r");
        let b_p = state_buffer("p");
        let b_q = state_buffer("q");
        let b_rhs = state_buffer("rhs");

        let b_scalars = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scalars"),
            size: 16, // alpha, beta
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let b_partial = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Dot Partials"),
            size: (num_groups as u64) * 8,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let b_staging_partial = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Partials"),
            size: (num_groups as u64) * 8,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let b_staging_x = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging x"),
            size: vec_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Group 0: matrix (read only) + params
        let bgl_matrix = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Matrix Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let bg_matrix = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Matrix Bind Group"),
            layout: &bgl_matrix,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: b_data.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: b_length.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: b_params.as_entire_binding(),
                },
            ],
        });

        // Group 1: iteration state
        let bgl_state = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("State Bind Group Layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, true),
                storage_entry(5, true),
            ],
        });
        let bg_state = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("State Bind Group"),
            layout: &bgl_state,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: b_x.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_r.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: b_p.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: b_q.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: b_scalars.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: b_rhs.as_entire_binding(),
                },
            ],
        });

        // Group 2: dot product operands
        let bgl_dot = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Dot Bind Group Layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let dot_bind_group = |label: &str, va: &wgpu::Buffer, vb: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &bgl_dot,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: va.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: vb.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: b_partial.as_entire_binding(),
                    },
                ],
            })
        };
        let bg_dot_p_q = dot_bind_group("Dot p.q", &b_p, &b_q);
        let bg_dot_r_r = dot_bind_group("Dot r.r", &b_r, &b_r);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("CG Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("gpu/cg.wgsl"))),
        });

        let pl_state = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("CG Pipeline Layout"),
            bind_group_layouts: &[&bgl_matrix, &bgl_state],
            push_constant_ranges: &[],
        });
        let pl_dot = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Dot Pipeline Layout"),
            bind_group_layouts: &[&bgl_matrix, &bgl_state, &bgl_dot],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, layout: &wgpu::PipelineLayout, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let pipeline_spmv = pipeline("SPMV", &pl_state, "spmv");
        let pipeline_init_r_p = pipeline("Init r p", &pl_state, "init_r_p");
        let pipeline_update_x_r = pipeline("Update x r", &pl_state, "update_x_r");
        let pipeline_update_p = pipeline("Update p", &pl_state, "update_p");
        let pipeline_dot = pipeline("Dot", &pl_dot, "dot_product");

        log::info!(
            "gpu solver ready: n={n}, {} workgroups of {WORKGROUP_SIZE}",
            num_groups
        );

        Ok(Self {
            context,
            n,
            num_groups,
            b_x,
            b_p,
            b_rhs,
            b_scalars,
            b_partial,
            b_staging_partial,
            b_staging_x,
            bg_matrix,
            bg_state,
            bg_dot_p_q,
            bg_dot_r_r,
            pipeline_spmv,
            pipeline_init_r_p,
            pipeline_update_x_r,
            pipeline_update_p,
            pipeline_dot,
        })
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, pipeline: &wgpu::ComputePipeline) {
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, &self.bg_matrix, &[]);
        cpass.set_bind_group(1, &self.bg_state, &[]);
        cpass.dispatch_workgroups(self.num_groups, 1, 1);
    }

    fn run_pass(&self, pipeline: &wgpu::ComputePipeline) {
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        self.encode_pass(&mut encoder, pipeline);
        self.context.queue.submit(Some(encoder.finish()));
    }

    fn read_staging(&self, src: &wgpu::Buffer, staging: &wgpu::Buffer, size: u64) -> Vec<f64> {
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(src, 0, staging, 0, size);
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        let _ = self
            .context
            .device
            .poll(wgpu::PollType::wait());
        rx.recv()
            .expect("map_async callback dropped")
            .expect("buffer map failed");

        let out = bytemuck::cast_slice::<u8, f64>(&slice.get_mapped_range()).to_vec();
        staging.unmap();
        out
    }

    /// Reduction across workgroup partials, finished on the host.
    fn dot(&self, bind_group: &wgpu::BindGroup) -> f64 {
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Dot Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline_dot);
            cpass.set_bind_group(0, &self.bg_matrix, &[]);
            cpass.set_bind_group(1, &self.bg_state, &[]);
            cpass.set_bind_group(2, bind_group, &[]);
            cpass.dispatch_workgroups(self.num_groups, 1, 1);
        }
        self.context.queue.submit(Some(encoder.finish()));

        self.read_staging(
            &self.b_partial,
            &self.b_staging_partial,
            (self.num_groups as u64) * 8,
        )
        .iter()
        .sum()
    }

    fn write_scalars(&self, alpha: f64, beta: f64) {
        self.context
            .queue
            .write_buffer(&self.b_scalars, 0, bytemuck::cast_slice(&[alpha, beta]));
    }

    /// Same state machine as the CPU [`crate::solver::cg`], with the vectors
    /// device-resident for the whole solve. `time_matvec` brackets spmv
    /// encode + submit on the host clock, so it is indicative only.
    pub fn solve(&self, b: &[f64], x: &mut [f64], opts: SolverOptions) -> SolverStats {
        assert_eq!(b.len(), self.n);
        assert_eq!(x.len(), self.n);

        let mut time_matvec = Duration::ZERO;

        // Upload b and x0; seed p with x0 so the setup spmv computes A*x0.
        self.context
            .queue
            .write_buffer(&self.b_rhs, 0, bytemuck::cast_slice(b));
        self.context
            .queue
            .write_buffer(&self.b_x, 0, bytemuck::cast_slice(x));
        self.write_scalars(0.0, 0.0);

        let t0 = Instant::now();
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Init CG"),
            });
        // p currently undefined; x0 goes in via a buffer copy, then
        // q = A*p and r = p = b - q.
        encoder.copy_buffer_to_buffer(&self.b_x, 0, &self.b_p, 0, (self.n as u64) * 8);
        self.encode_pass(&mut encoder, &self.pipeline_spmv);
        self.encode_pass(&mut encoder, &self.pipeline_init_r_p);
        self.context.queue.submit(Some(encoder.finish()));
        time_matvec += t0.elapsed();

        let mut rho = self.dot(&self.bg_dot_r_r);
        let bnrm2 = rho.sqrt();

        if rho < BREAKDOWN_TOL {
            return SolverStats {
                iter: 0,
                residual: bnrm2,
                bnrm2,
                time_matvec,
                termination: Termination::Converged,
            };
        }

        let mut result = None;
        for k in 0..opts.max_iter {
            let t0 = Instant::now();
            self.run_pass(&self.pipeline_spmv); // q = A*p
            time_matvec += t0.elapsed();

            let pq = self.dot(&self.bg_dot_p_q);
            if pq.abs() < BREAKDOWN_TOL {
                log::debug!("gpu cg: breakdown dot(p, q) = {pq:e} at iteration {k}");
                result = Some(SolverStats {
                    iter: k,
                    residual: rho.sqrt(),
                    bnrm2,
                    time_matvec,
                    termination: Termination::Converged,
                });
                break;
            }

            let alpha = rho / pq;
            self.write_scalars(alpha, 0.0);
            self.run_pass(&self.pipeline_update_x_r);

            let rho_new = self.dot(&self.bg_dot_r_r);
            let res = rho_new.sqrt();
            if res / bnrm2 <= opts.tolerance {
                log::info!("gpu cg: converged after {} iterations, residual {res:e}", k + 1);
                result = Some(SolverStats {
                    iter: k + 1,
                    residual: res,
                    bnrm2,
                    time_matvec,
                    termination: Termination::Converged,
                });
                break;
            }

            let beta = rho_new / rho;
            self.write_scalars(alpha, beta);
            self.run_pass(&self.pipeline_update_p);
            rho = rho_new;
        }

        let stats = result.unwrap_or_else(|| SolverStats {
            iter: opts.max_iter,
            residual: rho.sqrt(),
            bnrm2,
            time_matvec,
            termination: Termination::MaxIterReached,
        });

        let xs = self.read_staging(&self.b_x, &self.b_staging_x, (self.n as u64) * 8);
        x.copy_from_slice(&xs);
        stats
    }
}
